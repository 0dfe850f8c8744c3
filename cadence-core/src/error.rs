//! Error types for the Cadence core library.
//!
//! Every fallible operation in the host returns [`CadenceResult`]. Plugin
//! misbehaviour (a failed or slow lifecycle call, a broken subscriber sink) is
//! always expressed as a value of [`CadenceError`] and never tears down the
//! host process.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Config | Config file, environment and validation errors |
//! | E2001-E2099 | Plugin | Discovery, manifests, instance creation, settings and actions |
//! | E3001-E3099 | Session | Session state machine and lifecycle phase errors |
//! | E5001-E5099 | Schedule | Schedule definition and trigger errors |
//! | E6001-E6099 | Broadcast | Subscriber transport errors |
//! | E7001-E7099 | Store | Preset and schedule persistence errors |
//! | E9001-E9099 | General | Internal, IO, serialization and validation errors |

use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::session::LifecyclePhase;

/// The main error type for the Cadence core library.
#[derive(Debug, Error)]
pub enum CadenceError {
    // ========================================================================
    // Configuration Errors (E1001-E1099)
    // ========================================================================
    /// Configuration file not found
    #[error("[E1001] Configuration file not found: {0}")]
    ConfigFileNotFound(String),

    /// Configuration file parse error
    #[error("[E1002] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E1003] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    // ========================================================================
    // Plugin Errors (E2001-E2099)
    // ========================================================================
    /// Plugin error (generic)
    #[error("[E2001] Plugin error: {0}")]
    PluginError(String),

    /// No definition registered under this plugin id
    #[error("[E2002] Plugin not found: {0}")]
    PluginNotFound(String),

    /// Loader could not produce a definition or factory failed
    #[error("[E2003] Failed to load plugin '{name}': {message}")]
    PluginLoadFailed { name: String, message: String },

    /// Plugin manifest is malformed
    #[error("[E2004] Invalid plugin manifest at {path}: {message}")]
    ManifestInvalid { path: String, message: String },

    /// Instance has no setting with this key
    #[error("[E2005] Setting '{key}' not found on '{instance}'")]
    SettingNotFound { instance: String, key: String },

    /// Setting is currently read-only
    #[error("[E2006] Setting '{key}' on '{instance}' is read-only")]
    SettingReadOnly { instance: String, key: String },

    /// Instance has no action with this key
    #[error("[E2007] Action '{action}' not found on '{instance}'")]
    ActionNotFound { instance: String, action: String },

    /// Action exists but is disabled
    #[error("[E2008] Action '{action}' on '{instance}' is disabled")]
    ActionDisabled { instance: String, action: String },

    /// Operation attempted on an instance that was already disposed
    #[error("[E2009] Plugin instance '{0}' has been disposed")]
    InstanceDisposed(String),

    // ========================================================================
    // Session Errors (E3001-E3099)
    // ========================================================================
    /// A session is starting, running or stopping
    #[error("[E3001] Session already active (state: {0})")]
    SessionAlreadyActive(String),

    /// Stop requested while no session is running
    #[error("[E3002] No active session (state: {0})")]
    NoActiveSession(String),

    /// Aggregated failure of a session start, after rollback
    #[error("[E3003] Session start failed at plugin '{plugin}' ({instance_id}) during {phase}: {reason}")]
    SessionStartFailed {
        plugin: String,
        instance_id: String,
        phase: LifecyclePhase,
        reason: String,
    },

    /// A lifecycle phase exceeded its budget
    #[error("[E3004] Plugin '{plugin}' timed out during {phase} after {timeout_ms} ms")]
    LifecycleTimeout {
        plugin: String,
        phase: LifecyclePhase,
        timeout_ms: u64,
    },

    /// A lifecycle call returned an error
    #[error("[E3005] Plugin '{plugin}' failed during {phase}: {message}")]
    LifecycleFailure {
        plugin: String,
        phase: LifecyclePhase,
        message: String,
    },

    /// The caller cancelled the operation
    #[error("[E3006] Operation cancelled during {0}")]
    Cancelled(LifecyclePhase),

    /// No live session instance carries this instance id
    #[error("[E3007] Instance not found in active session: {0}")]
    InstanceNotFound(String),

    // ========================================================================
    // Schedule Errors (E5001-E5099)
    // ========================================================================
    /// Schedule id is unknown
    #[error("[E5001] Schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Schedule definition is inconsistent
    #[error("[E5002] Invalid schedule: {0}")]
    InvalidSchedule(String),

    // ========================================================================
    // Broadcast Errors (E6001-E6099)
    // ========================================================================
    /// A subscriber sink became unusable
    #[error("[E6001] Subscriber transport failed: {0}")]
    TransportFailure(String),

    // ========================================================================
    // Store Errors (E7001-E7099)
    // ========================================================================
    /// Preset id is unknown
    #[error("[E7001] Preset not found: {0}")]
    PresetNotFound(String),

    /// Backing store failed
    #[error("[E7002] Store error: {0}")]
    StoreError(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// Resource already exists
    #[error("[E9002] Resource already exists: {0}")]
    AlreadyExists(String),

    /// User-fixable validation error
    #[error("[E9003] Validation error: {0}")]
    ValidationError(String),

    /// IO error
    #[error("[E9004] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E9005] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for Cadence operations.
pub type CadenceResult<T> = Result<T, CadenceError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

impl From<serde_json::Error> for CadenceError {
    fn from(err: serde_json::Error) -> Self {
        CadenceError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CadenceError {
    fn from(err: std::io::Error) -> Self {
        CadenceError::IoError(err.to_string())
    }
}

impl From<toml::de::Error> for CadenceError {
    fn from(err: toml::de::Error) -> Self {
        CadenceError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for CadenceError {
    fn from(err: reqwest::Error) -> Self {
        CadenceError::PluginError(format!("HTTP client error: {}", err))
    }
}

impl From<config::ConfigError> for CadenceError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => CadenceError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => CadenceError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => CadenceError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => CadenceError::ConfigParseError(err.to_string()),
        }
    }
}

impl From<crate::config::ConfigLoadError> for CadenceError {
    fn from(err: crate::config::ConfigLoadError) -> Self {
        match err {
            crate::config::ConfigLoadError::Config(e) => e.into(),
            crate::config::ConfigLoadError::InvalidValue { key, message } => {
                CadenceError::InvalidConfigValue { key, message }
            }
            crate::config::ConfigLoadError::MissingRequired(key) => {
                CadenceError::InvalidConfigValue {
                    key,
                    message: "Missing required value".to_string(),
                }
            }
            crate::config::ConfigLoadError::Io(e) => e.into(),
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl CadenceError {
    /// Returns true if this error is related to configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            CadenceError::ConfigFileNotFound(_)
                | CadenceError::ConfigParseError(_)
                | CadenceError::InvalidConfigValue { .. }
        )
    }

    /// Returns true if this error is related to plugin definitions or instances.
    pub fn is_plugin_error(&self) -> bool {
        matches!(
            self,
            CadenceError::PluginError(_)
                | CadenceError::PluginNotFound(_)
                | CadenceError::PluginLoadFailed { .. }
                | CadenceError::ManifestInvalid { .. }
                | CadenceError::SettingNotFound { .. }
                | CadenceError::SettingReadOnly { .. }
                | CadenceError::ActionNotFound { .. }
                | CadenceError::ActionDisabled { .. }
                | CadenceError::InstanceDisposed(_)
        )
    }

    /// Returns true if this error came from the session state machine.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            CadenceError::SessionAlreadyActive(_)
                | CadenceError::NoActiveSession(_)
                | CadenceError::SessionStartFailed { .. }
                | CadenceError::LifecycleTimeout { .. }
                | CadenceError::LifecycleFailure { .. }
                | CadenceError::Cancelled(_)
                | CadenceError::InstanceNotFound(_)
        )
    }

    /// Returns true for the typed "unknown id" family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CadenceError::PluginNotFound(_)
                | CadenceError::PresetNotFound(_)
                | CadenceError::ScheduleNotFound(_)
                | CadenceError::InstanceNotFound(_)
                | CadenceError::SettingNotFound { .. }
                | CadenceError::ActionNotFound { .. }
                | CadenceError::ConfigFileNotFound(_)
        )
    }

    /// Returns true if this error is transient and the operation might succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CadenceError::SessionAlreadyActive(_)
                | CadenceError::LifecycleTimeout { .. }
                | CadenceError::TransportFailure(_)
                | CadenceError::StoreError(_)
                | CadenceError::IoError(_)
        ) || matches!(
            self,
            CadenceError::SessionStartFailed {
                phase: LifecyclePhase::Initialize | LifecyclePhase::Start,
                ..
            }
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CadenceError::ConfigFileNotFound(_) => "E1001",
            CadenceError::ConfigParseError(_) => "E1002",
            CadenceError::InvalidConfigValue { .. } => "E1003",
            CadenceError::PluginError(_) => "E2001",
            CadenceError::PluginNotFound(_) => "E2002",
            CadenceError::PluginLoadFailed { .. } => "E2003",
            CadenceError::ManifestInvalid { .. } => "E2004",
            CadenceError::SettingNotFound { .. } => "E2005",
            CadenceError::SettingReadOnly { .. } => "E2006",
            CadenceError::ActionNotFound { .. } => "E2007",
            CadenceError::ActionDisabled { .. } => "E2008",
            CadenceError::InstanceDisposed(_) => "E2009",
            CadenceError::SessionAlreadyActive(_) => "E3001",
            CadenceError::NoActiveSession(_) => "E3002",
            CadenceError::SessionStartFailed { .. } => "E3003",
            CadenceError::LifecycleTimeout { .. } => "E3004",
            CadenceError::LifecycleFailure { .. } => "E3005",
            CadenceError::Cancelled(_) => "E3006",
            CadenceError::InstanceNotFound(_) => "E3007",
            CadenceError::ScheduleNotFound(_) => "E5001",
            CadenceError::InvalidSchedule(_) => "E5002",
            CadenceError::TransportFailure(_) => "E6001",
            CadenceError::PresetNotFound(_) => "E7001",
            CadenceError::StoreError(_) => "E7002",
            CadenceError::Internal(_) => "E9001",
            CadenceError::AlreadyExists(_) => "E9002",
            CadenceError::ValidationError(_) => "E9003",
            CadenceError::IoError(_) => "E9004",
            CadenceError::SerializationError(_) => "E9005",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            CadenceError::ConfigFileNotFound(_) => {
                Some("Create cadence.toml or set CADENCE_* environment variables")
            }
            CadenceError::PluginNotFound(_) => {
                Some("Run 'cadence plugins list' to see the discovered plugins")
            }
            CadenceError::SessionAlreadyActive(_) => {
                Some("Stop the running session before starting another one")
            }
            CadenceError::NoActiveSession(_) => Some("Start a session first"),
            CadenceError::SessionStartFailed {
                phase: LifecyclePhase::Validate,
                ..
            } => Some("Fix the reported plugin settings and start the session again"),
            CadenceError::LifecycleTimeout { .. } => {
                Some("Increase the session timeouts in the configuration or check the plugin")
            }
            CadenceError::PresetNotFound(_) => {
                Some("Run 'cadence presets list' to see the stored presets")
            }
            _ => None,
        }
    }

    /// Create a plugin error
    pub fn plugin(message: impl Into<String>) -> Self {
        CadenceError::PluginError(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        CadenceError::Internal(message.into())
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with its suggestion.
pub struct CliErrorDisplay<'a> {
    error: &'a CadenceError,
    show_suggestion: bool,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a CadenceError) -> Self {
        Self {
            error,
            show_suggestion: true,
        }
    }

    pub fn without_suggestion(mut self) -> Self {
        self.show_suggestion = false;
        self
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.error)?;

        if self.show_suggestion {
            if let Some(suggestion) = self.error.user_suggestion() {
                writeln!(f)?;
                writeln!(f, "  Suggestion: {}", suggestion)?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CadenceError::PluginNotFound("focus-blocker".to_string());
        assert!(err.to_string().contains("E2002"));
        assert!(err.to_string().contains("focus-blocker"));

        let err = CadenceError::SessionStartFailed {
            plugin: "spotify".to_string(),
            instance_id: "inst-2".to_string(),
            phase: LifecyclePhase::Validate,
            reason: "token missing".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("E3003"));
        assert!(msg.contains("spotify"));
        assert!(msg.contains("validate"));
        assert!(msg.contains("token missing"));
    }

    #[test]
    fn test_error_categorization() {
        let err = CadenceError::PluginNotFound("x".to_string());
        assert!(err.is_plugin_error());
        assert!(err.is_not_found());
        assert!(!err.is_session_error());

        let err = CadenceError::NoActiveSession("idle".to_string());
        assert!(err.is_session_error());
        assert!(!err.is_plugin_error());

        let err = CadenceError::InvalidConfigValue {
            key: "session.startup_timeout_secs".to_string(),
            message: "Must be greater than 0".to_string(),
        };
        assert!(err.is_config_error());
    }

    #[test]
    fn test_is_transient() {
        assert!(CadenceError::TransportFailure("closed".to_string()).is_transient());
        assert!(CadenceError::LifecycleTimeout {
            plugin: "p".to_string(),
            phase: LifecyclePhase::Start,
            timeout_ms: 1000,
        }
        .is_transient());
        assert!(!CadenceError::PresetNotFound("p".to_string()).is_transient());
        assert!(!CadenceError::SessionStartFailed {
            plugin: "p".to_string(),
            instance_id: "i".to_string(),
            phase: LifecyclePhase::Validate,
            reason: "bad".to_string(),
        }
        .is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CadenceError::ConfigParseError("x".to_string()).error_code(),
            "E1002"
        );
        assert_eq!(
            CadenceError::SessionAlreadyActive("running".to_string()).error_code(),
            "E3001"
        );
        assert_eq!(
            CadenceError::ScheduleNotFound("s".to_string()).error_code(),
            "E5001"
        );
        assert_eq!(
            CadenceError::TransportFailure("t".to_string()).error_code(),
            "E6001"
        );
        assert_eq!(CadenceError::internal("x").error_code(), "E9001");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CadenceError = io_err.into();
        assert!(matches!(err, CadenceError::IoError(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: CadenceError = json_err.into();
        assert!(matches!(err, CadenceError::SerializationError(_)));
    }

    #[test]
    fn test_cli_error_display() {
        let err = CadenceError::NoActiveSession("idle".to_string());
        let output = CliErrorDisplay::new(&err).to_string();
        assert!(output.contains("E3002"));
        assert!(output.contains("Suggestion"));

        let output = CliErrorDisplay::new(&err).without_suggestion().to_string();
        assert!(!output.contains("Suggestion"));
    }
}
