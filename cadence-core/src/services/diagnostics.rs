use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::UpdateBroadcaster;
use crate::plugins::{PluginRegistry, SandboxPool};
use crate::session::{SessionOrchestrator, SessionState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub session_state: SessionState,
    pub active_sessions: usize,
    pub plugins: usize,
    pub sandboxes: usize,
    pub subscribers: usize,
    pub attached_instances: usize,
}

pub struct DiagnosticsService {
    started_at: DateTime<Utc>,
    registry: Arc<PluginRegistry>,
    orchestrator: Arc<SessionOrchestrator>,
    sandbox: Arc<SandboxPool>,
    broadcaster: UpdateBroadcaster,
}

impl DiagnosticsService {
    pub fn new(
        registry: Arc<PluginRegistry>,
        orchestrator: Arc<SessionOrchestrator>,
        sandbox: Arc<SandboxPool>,
        broadcaster: UpdateBroadcaster,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            registry,
            orchestrator,
            sandbox,
            broadcaster,
        }
    }

    pub fn version(&self) -> &'static str {
        crate::VERSION
    }

    pub fn active_session_count(&self) -> usize {
        usize::from(self.orchestrator.active_session().is_some())
    }

    pub async fn health(&self) -> HealthReport {
        let now = Utc::now();
        HealthReport {
            status: "ok".to_string(),
            version: self.version().to_string(),
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            session_state: self.orchestrator.state(),
            active_sessions: self.active_session_count(),
            plugins: self.registry.list_definitions().len(),
            sandboxes: self.sandbox.len().await,
            subscribers: self.broadcaster.subscriber_count(),
            attached_instances: self.broadcaster.attached_count(),
        }
    }
}
