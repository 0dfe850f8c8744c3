use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CadenceError, CadenceResult};
use crate::notify::{notify_quietly, Notification, NotificationChannel, Notifier};
use crate::session::SessionOrchestrator;
use crate::store::PresetStore;

struct Tracked {
    session_id: String,
    deadline: Instant,
    next_preset_id: Option<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Stops a session after a fixed duration and optionally chains into another preset.
///
/// At most one session is tracked; tracking a new one cancels the old timer.
pub struct AutoStopTracker {
    orchestrator: Arc<SessionOrchestrator>,
    presets: Arc<dyn PresetStore>,
    notifier: Arc<dyn Notifier>,
    current: Mutex<Option<Tracked>>,
}

impl AutoStopTracker {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        presets: Arc<dyn PresetStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orchestrator,
            presets,
            notifier,
            current: Mutex::new(None),
        }
    }

    /// Arms the timer for `session_id`. Without a duration nothing is tracked
    /// and any previous timer is cancelled.
    pub fn start_tracking(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        duration: Option<Duration>,
        next_preset_id: Option<String>,
    ) {
        let session_id = session_id.into();
        self.stop_tracking();

        let Some(duration) = duration else {
            if next_preset_id.is_some() {
                warn!(
                    session_id = %session_id,
                    "Next preset ignored without an auto-stop duration"
                );
            }
            return;
        };

        let cancel = CancellationToken::new();
        let deadline = Instant::now() + duration;
        let tracker = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task_session = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracker.expire(&task_session).await;
                }
            }
        });

        info!(
            session_id = %session_id,
            minutes = duration.as_secs() / 60,
            next_preset_id = next_preset_id.as_deref().unwrap_or("-"),
            "Auto-stop armed"
        );
        *self.lock() = Some(Tracked {
            session_id,
            deadline,
            next_preset_id,
            cancel,
            handle,
        });
    }

    /// Cancels the pending timer. Returns `false` when nothing was tracked.
    pub fn stop_tracking(&self) -> bool {
        match self.lock().take() {
            Some(tracked) => {
                tracked.cancel.cancel();
                debug!(session_id = %tracked.session_id, "Auto-stop cancelled");
                true
            }
            None => false,
        }
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        self.lock()
            .as_ref()
            .map(|t| t.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_tracking(&self) -> bool {
        self.lock().is_some()
    }

    pub fn tracked_session_id(&self) -> Option<String> {
        self.lock().as_ref().map(|t| t.session_id.clone())
    }

    pub fn next_preset_id(&self) -> Option<String> {
        self.lock().as_ref().and_then(|t| t.next_preset_id.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Tracked>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes the tracking entry only if it still belongs to `session_id`.
    fn take_if_current(&self, session_id: &str) -> Option<Tracked> {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|t| t.session_id == session_id) {
            current.take()
        } else {
            None
        }
    }

    async fn expire(&self, session_id: &str) {
        let Some(tracked) = self.take_if_current(session_id) else {
            return;
        };
        // The timer task is the one running; dropping its handle detaches it.
        drop(tracked.handle);

        let still_active = self
            .orchestrator
            .active_session()
            .is_some_and(|s| s.session_id == session_id);
        if !still_active {
            debug!(session_id = %session_id, "Auto-stop expired for a session that already ended");
            return;
        }

        info!(session_id = %session_id, "Auto-stop expired, stopping session");
        match self.orchestrator.stop_session().await {
            Ok(report) => {
                let message = if report.is_clean() {
                    "The scheduled session ended".to_string()
                } else {
                    format!(
                        "The scheduled session ended with {} plugin error(s)",
                        report.failures.len()
                    )
                };
                notify_quietly(
                    self.notifier.as_ref(),
                    NotificationChannel::System,
                    Notification::info("Session ended", message),
                )
                .await;
            }
            Err(e) => {
                e.log();
                return;
            }
        }

        if let Some(next) = tracked.next_preset_id {
            if let Err(e) = self.start_chained(&next).await {
                e.log();
                notify_quietly(
                    self.notifier.as_ref(),
                    NotificationChannel::System,
                    Notification::error("Next session failed", e.to_string()),
                )
                .await;
            }
        }
    }

    async fn start_chained(&self, preset_id: &str) -> CadenceResult<()> {
        let preset = self
            .presets
            .get_by_id(preset_id)
            .await?
            .ok_or_else(|| CadenceError::PresetNotFound(preset_id.to_string()))?;
        let name = preset.name.clone();

        let outcome = self
            .orchestrator
            .start_session(preset, CancellationToken::new())
            .await?;
        info!(
            session_id = %outcome.session_id,
            preset_id = %preset_id,
            "Chained session started"
        );
        notify_quietly(
            self.notifier.as_ref(),
            NotificationChannel::System,
            Notification::info("Session started", format!("Started '{}'", name)),
        )
        .await;
        Ok(())
    }
}

impl Drop for AutoStopTracker {
    fn drop(&mut self) {
        if let Some(tracked) = self
            .current
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            tracked.cancel.cancel();
        }
    }
}
