mod orchestrator;
mod types;

pub use orchestrator::{SessionOrchestrator, SessionTimeouts};
pub use types::{
    LifecyclePhase, SessionEvent, SessionInfo, SessionPluginInfo, SessionState, StartOutcome,
    StartWarning, StopFailure, StopReport,
};
