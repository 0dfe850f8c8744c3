use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{CadenceError, CadenceResult};
use crate::scheduler::AutoStopTracker;
use crate::session::{
    SessionEvent, SessionInfo, SessionOrchestrator, SessionState, StartOutcome, StopReport,
};
use crate::store::PresetStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session: Option<SessionInfo>,
    /// Seconds until the tracked session is stopped automatically.
    pub auto_stop_remaining_secs: Option<u64>,
}

pub struct SessionService {
    orchestrator: Arc<SessionOrchestrator>,
    presets: Arc<dyn PresetStore>,
    auto_stop: Arc<AutoStopTracker>,
}

impl SessionService {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        presets: Arc<dyn PresetStore>,
        auto_stop: Arc<AutoStopTracker>,
    ) -> Self {
        Self {
            orchestrator,
            presets,
            auto_stop,
        }
    }

    /// Starts the stored preset, optionally stopping it after `auto_stop`.
    pub async fn start(
        &self,
        preset_id: &str,
        auto_stop: Option<Duration>,
        cancel: CancellationToken,
    ) -> CadenceResult<StartOutcome> {
        let preset = self
            .presets
            .get_by_id(preset_id)
            .await?
            .ok_or_else(|| CadenceError::PresetNotFound(preset_id.to_string()))?;

        let outcome = self.orchestrator.start_session(preset, cancel).await?;
        // A start without a duration still clears any leftover timer.
        self.auto_stop
            .start_tracking(outcome.session_id.clone(), auto_stop, None);
        Ok(outcome)
    }

    /// Manual stop. Cancels auto-stop first so no chained preset starts.
    pub async fn stop(&self) -> CadenceResult<StopReport> {
        if !self.orchestrator.is_running() {
            return Err(CadenceError::NoActiveSession(
                self.orchestrator.state().to_string(),
            ));
        }
        self.auto_stop.stop_tracking();
        self.orchestrator.stop_session().await
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.orchestrator.state(),
            session: self.orchestrator.active_session(),
            auto_stop_remaining_secs: self.auto_stop.time_remaining().map(|d| d.as_secs()),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.orchestrator.subscribe_events()
    }
}
