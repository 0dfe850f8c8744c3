use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A step of the plugin lifecycle, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Create,
    ApplySettings,
    Initialize,
    Validate,
    Start,
    End,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Create => write!(f, "create"),
            LifecyclePhase::ApplySettings => write!(f, "apply_settings"),
            LifecyclePhase::Initialize => write!(f, "initialize"),
            LifecyclePhase::Validate => write!(f, "validate"),
            LifecyclePhase::Start => write!(f, "start"),
            LifecyclePhase::End => write!(f, "end"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopping => write!(f, "stopping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPluginInfo {
    pub instance_id: String,
    pub plugin_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub preset_id: String,
    pub preset_name: String,
    pub started_at: DateTime<Utc>,
    pub plugins: Vec<SessionPluginInfo>,
}

/// A non-fatal validation result recorded during start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWarning {
    pub plugin_id: String,
    pub instance_id: String,
    pub message: String,
    #[serde(default)]
    pub field_errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOutcome {
    pub session_id: String,
    pub preset_id: String,
    pub warnings: Vec<StartWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopFailure {
    pub plugin_id: String,
    pub instance_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    pub session_id: String,
    pub preset_id: String,
    pub stopped_at: DateTime<Utc>,
    pub failures: Vec<StopFailure>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started {
        session_id: String,
        preset_id: String,
        preset_name: String,
        warnings: Vec<StartWarning>,
        at: DateTime<Utc>,
    },
    Stopped {
        session_id: String,
        preset_id: String,
        failures: Vec<StopFailure>,
        at: DateTime<Utc>,
    },
    StartFailed {
        preset_id: String,
        plugin: String,
        instance_id: String,
        phase: LifecyclePhase,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn preset_id(&self) -> &str {
        match self {
            SessionEvent::Started { preset_id, .. }
            | SessionEvent::Stopped { preset_id, .. }
            | SessionEvent::StartFailed { preset_id, .. } => preset_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::Started { at, .. }
            | SessionEvent::Stopped { at, .. }
            | SessionEvent::StartFailed { at, .. } => *at,
        }
    }
}
