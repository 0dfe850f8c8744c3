use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::UpdateBroadcaster;
use crate::config::SessionConfig;
use crate::error::{CadenceError, CadenceResult};
use crate::models::{ConfiguredPlugin, SessionPreset, ValidationStatus};
use crate::plugins::{PluginInstance, PluginRegistry};

use super::types::{
    LifecyclePhase, SessionEvent, SessionInfo, SessionPluginInfo, SessionState, StartOutcome,
    StartWarning, StopFailure, StopReport,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    pub validation: Duration,
    pub startup: Duration,
    pub shutdown: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionTimeouts {
    fn from(config: &SessionConfig) -> Self {
        Self {
            validation: config.validation_timeout(),
            startup: config.startup_timeout(),
            shutdown: config.shutdown_timeout(),
        }
    }
}

struct StartedPlugin {
    configured: ConfiguredPlugin,
    instance: Arc<PluginInstance>,
}

struct ActiveSession {
    info: SessionInfo,
    preset: SessionPreset,
    plugins: Vec<StartedPlugin>,
}

struct PhaseFailure {
    phase: LifecyclePhase,
    error: CadenceError,
}

struct InFlight {
    instance_id: String,
    instance: Arc<PluginInstance>,
}

/// Owns the plugins of a start in progress. If the start future is dropped
/// before it finishes, the plugins are rolled back on a background task and
/// the state returns to `Idle` only once that is done.
struct StartGuard {
    state: Arc<watch::Sender<SessionState>>,
    broadcaster: UpdateBroadcaster,
    shutdown: Duration,
    session_id: String,
    started: Vec<StartedPlugin>,
    in_flight: Option<InFlight>,
    armed: bool,
}

impl StartGuard {
    fn finish(mut self, to: SessionState) {
        self.armed = false;
        self.state.send_replace(to);
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session_id = std::mem::take(&mut self.session_id);
        warn!(session_id = %session_id, "Session start abandoned, rolling back");

        // Never finished starting, so it is disposed without being ended.
        if let Some(in_flight) = self.in_flight.take() {
            self.broadcaster.detach(&in_flight.instance_id);
            in_flight.instance.dispose();
        }

        let started = std::mem::take(&mut self.started);
        let state = Arc::clone(&self.state);
        let broadcaster = self.broadcaster.clone();
        let limit = self.shutdown;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    teardown(&broadcaster, limit, &session_id, started).await;
                    state.send_replace(SessionState::Idle);
                });
            }
            Err(_) => {
                for plugin in started.into_iter().rev() {
                    broadcaster.detach(&plugin.configured.instance_id);
                    plugin.instance.dispose();
                }
                state.send_replace(SessionState::Idle);
            }
        }
    }
}

/// Resets the state to `Idle` if a transition is abandoned midway.
struct TransitionGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl<'a> TransitionGuard<'a> {
    fn new(state: &'a watch::Sender<SessionState>) -> Self {
        Self { state, armed: true }
    }

    fn finish(mut self, to: SessionState) {
        self.armed = false;
        self.state.send_replace(to);
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Session transition abandoned, resetting to idle");
            self.state.send_replace(SessionState::Idle);
        }
    }
}

/// Drives the `Idle -> Starting -> Running -> Stopping -> Idle` state machine.
///
/// Only one transition runs at a time; a caller arriving during another
/// transition fails immediately instead of waiting.
pub struct SessionOrchestrator {
    registry: Arc<PluginRegistry>,
    broadcaster: UpdateBroadcaster,
    timeouts: SessionTimeouts,
    state: Arc<watch::Sender<SessionState>>,
    active: RwLock<Option<Arc<ActiveSession>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionOrchestrator {
    pub fn new(
        registry: Arc<PluginRegistry>,
        broadcaster: UpdateBroadcaster,
        timeouts: SessionTimeouts,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            broadcaster,
            timeouts,
            state: Arc::new(watch::Sender::new(SessionState::Idle)),
            active: RwLock::new(None),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn active_session(&self) -> Option<SessionInfo> {
        self.current().map(|active| active.info.clone())
    }

    pub fn active_preset(&self) -> Option<SessionPreset> {
        self.current().map(|active| active.preset.clone())
    }

    pub fn find_instance(&self, instance_id: &str) -> Option<Arc<PluginInstance>> {
        self.current().and_then(|active| {
            active
                .plugins
                .iter()
                .find(|p| p.configured.instance_id == instance_id)
                .map(|p| Arc::clone(&p.instance))
        })
    }

    fn current(&self) -> Option<Arc<ActiveSession>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn try_transition(&self, from: SessionState, to: SessionState) -> Result<(), SessionState> {
        let mut observed = from;
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                observed = *state;
                false
            }
        });
        if moved {
            Ok(())
        } else {
            Err(observed)
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Starts `preset`, rolling back every started plugin if any plugin fails.
    pub async fn start_session(
        &self,
        preset: SessionPreset,
        cancel: CancellationToken,
    ) -> CadenceResult<StartOutcome> {
        self.try_transition(SessionState::Idle, SessionState::Starting)
            .map_err(|state| CadenceError::SessionAlreadyActive(state.to_string()))?;

        let session_id = Uuid::new_v4().to_string();
        let mut guard = StartGuard {
            state: Arc::clone(&self.state),
            broadcaster: self.broadcaster.clone(),
            shutdown: self.timeouts.shutdown,
            session_id: session_id.clone(),
            started: Vec::with_capacity(preset.plugins.len()),
            in_flight: None,
            armed: true,
        };

        let duplicates = preset.duplicate_instance_ids();
        if !duplicates.is_empty() {
            guard.finish(SessionState::Idle);
            return Err(CadenceError::ValidationError(format!(
                "Duplicate instance ids in preset '{}': {}",
                preset.name,
                duplicates.join(", ")
            )));
        }

        info!(
            session_id = %session_id,
            preset_id = %preset.id,
            plugins = preset.plugins.len(),
            "Starting session"
        );

        let mut warnings = Vec::new();

        for configured in &preset.plugins {
            let result = self
                .start_plugin(&session_id, configured, &cancel, &mut guard.in_flight)
                .await;
            match result {
                Ok((instance, warning)) => {
                    warnings.extend(warning);
                    guard.started.push(StartedPlugin {
                        configured: configured.clone(),
                        instance,
                    });
                }
                Err(failure) => {
                    let reason = failure.error.to_string();
                    error!(
                        session_id = %session_id,
                        plugin_id = %configured.plugin_id,
                        instance_id = %configured.instance_id,
                        phase = %failure.phase,
                        error = %reason,
                        "Session start failed, rolling back"
                    );

                    let started = std::mem::take(&mut guard.started);
                    let rollback_failures = self.detached_teardown(&session_id, started).await;
                    if !rollback_failures.is_empty() {
                        warn!(
                            session_id = %session_id,
                            failures = rollback_failures.len(),
                            "Rollback finished with errors"
                        );
                    }
                    guard.finish(SessionState::Idle);

                    self.publish(SessionEvent::StartFailed {
                        preset_id: preset.id.clone(),
                        plugin: configured.plugin_id.clone(),
                        instance_id: configured.instance_id.clone(),
                        phase: failure.phase,
                        reason: reason.clone(),
                        at: Utc::now(),
                    });

                    return Err(CadenceError::SessionStartFailed {
                        plugin: configured.plugin_id.clone(),
                        instance_id: configured.instance_id.clone(),
                        phase: failure.phase,
                        reason,
                    });
                }
            }
        }

        let started = std::mem::take(&mut guard.started);
        let info = SessionInfo {
            session_id: session_id.clone(),
            preset_id: preset.id.clone(),
            preset_name: preset.name.clone(),
            started_at: Utc::now(),
            plugins: started
                .iter()
                .map(|p| SessionPluginInfo {
                    instance_id: p.configured.instance_id.clone(),
                    plugin_id: p.configured.plugin_id.clone(),
                    display_name: p.configured.display_name().to_string(),
                })
                .collect(),
        };
        let outcome = StartOutcome {
            session_id: session_id.clone(),
            preset_id: preset.id.clone(),
            warnings: warnings.clone(),
        };
        let preset_name = preset.name.clone();

        *self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(ActiveSession {
            info,
            preset,
            plugins: started,
        }));
        guard.finish(SessionState::Running);

        info!(
            session_id = %session_id,
            preset_id = %outcome.preset_id,
            warnings = warnings.len(),
            "Session running"
        );
        self.publish(SessionEvent::Started {
            session_id,
            preset_id: outcome.preset_id.clone(),
            preset_name,
            warnings,
            at: Utc::now(),
        });

        Ok(outcome)
    }

    /// Ends the running session. Plugin failures are reported, never fatal.
    pub async fn stop_session(&self) -> CadenceResult<StopReport> {
        self.try_transition(SessionState::Running, SessionState::Stopping)
            .map_err(|state| CadenceError::NoActiveSession(state.to_string()))?;
        let guard = TransitionGuard::new(&self.state);

        let active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let (session_id, preset_id, failures) = match active {
            Some(active) => {
                let session_id = active.info.session_id.clone();
                let preset_id = active.info.preset_id.clone();
                info!(session_id = %session_id, preset_id = %preset_id, "Stopping session");

                // Instances are shared with lookups; take them out of the session.
                let plugins = match Arc::try_unwrap(active) {
                    Ok(active) => active.plugins,
                    Err(shared) => shared
                        .plugins
                        .iter()
                        .map(|p| StartedPlugin {
                            configured: p.configured.clone(),
                            instance: Arc::clone(&p.instance),
                        })
                        .collect(),
                };
                let failures = self.detached_teardown(&session_id, plugins).await;
                (session_id, preset_id, failures)
            }
            None => {
                warn!("Running state without an active session");
                (String::new(), String::new(), Vec::new())
            }
        };

        guard.finish(SessionState::Idle);

        let report = StopReport {
            session_id: session_id.clone(),
            preset_id: preset_id.clone(),
            stopped_at: Utc::now(),
            failures: failures.clone(),
        };
        info!(
            session_id = %session_id,
            failures = failures.len(),
            "Session stopped"
        );
        self.publish(SessionEvent::Stopped {
            session_id,
            preset_id,
            failures,
            at: report.stopped_at,
        });

        Ok(report)
    }

    async fn start_plugin(
        &self,
        session_id: &str,
        configured: &ConfiguredPlugin,
        cancel: &CancellationToken,
        in_flight: &mut Option<InFlight>,
    ) -> Result<(Arc<PluginInstance>, Option<StartWarning>), PhaseFailure> {
        let plugin_id = configured.plugin_id.as_str();
        let instance_id = configured.instance_id.as_str();

        if cancel.is_cancelled() {
            return Err(PhaseFailure {
                phase: LifecyclePhase::Create,
                error: CadenceError::Cancelled(LifecyclePhase::Create),
            });
        }

        let instance = self
            .registry
            .create_instance_with_key(plugin_id, instance_id)
            .map_err(|error| PhaseFailure {
                phase: LifecyclePhase::Create,
                error,
            })?;
        let instance = Arc::new(instance);
        *in_flight = Some(InFlight {
            instance_id: instance_id.to_string(),
            instance: Arc::clone(&instance),
        });

        let result = self
            .bring_up(session_id, configured, &instance, cancel)
            .await;
        *in_flight = None;
        match result {
            Ok(warning) => Ok((instance, warning)),
            Err(failure) => {
                self.broadcaster.detach(instance_id);
                instance.dispose();
                Err(failure)
            }
        }
    }

    async fn bring_up(
        &self,
        session_id: &str,
        configured: &ConfiguredPlugin,
        instance: &Arc<PluginInstance>,
        cancel: &CancellationToken,
    ) -> Result<Option<StartWarning>, PhaseFailure> {
        let plugin_id = configured.plugin_id.as_str();
        let instance_id = configured.instance_id.as_str();
        let fail = |phase: LifecyclePhase| move |error: CadenceError| PhaseFailure { phase, error };

        instance
            .apply_settings(&configured.settings)
            .map_err(fail(LifecyclePhase::ApplySettings))?;
        self.broadcaster.attach_instance(instance_id, instance);

        run_phase(
            plugin_id,
            LifecyclePhase::Initialize,
            self.timeouts.startup,
            cancel,
            |token| instance.initialize(token),
        )
        .await
        .map_err(fail(LifecyclePhase::Initialize))?;

        let validation = run_phase(
                plugin_id,
                LifecyclePhase::Validate,
                self.timeouts.validation,
                cancel,
                |token| instance.validate_settings(token),
            )
            .await
            .map_err(fail(LifecyclePhase::Validate))?;

        let warning = match validation.status {
            ValidationStatus::Ok => None,
            ValidationStatus::Warning => {
                warn!(
                    session_id = %session_id,
                    plugin_id = %plugin_id,
                    instance_id = %instance_id,
                    message = %validation.summary(),
                    "Plugin settings validated with warnings"
                );
                Some(StartWarning {
                    plugin_id: plugin_id.to_string(),
                    instance_id: instance_id.to_string(),
                    message: validation.message.clone(),
                    field_errors: validation.field_errors.clone(),
                })
            }
            ValidationStatus::Error => {
                return Err(PhaseFailure {
                    phase: LifecyclePhase::Validate,
                    error: CadenceError::ValidationError(validation.summary()),
                });
            }
        };

        run_phase(
            plugin_id,
            LifecyclePhase::Start,
            self.timeouts.startup,
            cancel,
            |token| instance.on_session_start(token),
        )
        .await
        .map_err(fail(LifecyclePhase::Start))?;

        debug!(
            session_id = %session_id,
            plugin_id = %plugin_id,
            instance_id = %instance_id,
            "Plugin started"
        );
        Ok(warning)
    }

    /// Runs `teardown` on its own task so dropping the caller cannot cut it short.
    async fn detached_teardown(
        &self,
        session_id: &str,
        plugins: Vec<StartedPlugin>,
    ) -> Vec<StopFailure> {
        let broadcaster = self.broadcaster.clone();
        let limit = self.timeouts.shutdown;
        let id = session_id.to_string();
        let task =
            tokio::spawn(async move { teardown(&broadcaster, limit, &id, plugins).await });
        match task.await {
            Ok(failures) => failures,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Teardown task ended abnormally");
                Vec::new()
            }
        }
    }
}

/// Ends, detaches and disposes plugins in reverse start order.
async fn teardown(
    broadcaster: &UpdateBroadcaster,
    limit: Duration,
    session_id: &str,
    plugins: Vec<StartedPlugin>,
) -> Vec<StopFailure> {
    let mut failures = Vec::new();

    for started in plugins.into_iter().rev() {
        let plugin_id = started.configured.plugin_id.as_str();
        let instance_id = started.configured.instance_id.as_str();
        let instance = &started.instance;

        let ended = run_phase(
            plugin_id,
            LifecyclePhase::End,
            limit,
            &CancellationToken::new(),
            |token| instance.on_session_end(token),
        )
        .await;

        if let Err(e) = ended {
            warn!(
                session_id = %session_id,
                plugin_id = %plugin_id,
                instance_id = %instance_id,
                error = %e,
                "Plugin failed to end session"
            );
            failures.push(StopFailure {
                plugin_id: plugin_id.to_string(),
                instance_id: instance_id.to_string(),
                reason: e.to_string(),
            });
        }

        broadcaster.detach(instance_id);
        instance.dispose();
    }

    failures
}

/// Runs one lifecycle call under `limit`, aborting early on `cancel`.
/// The plugin receives a child token that is cancelled once the call ends.
async fn run_phase<T, F, Fut>(
    plugin_id: &str,
    phase: LifecyclePhase,
    limit: Duration,
    cancel: &CancellationToken,
    call: F,
) -> CadenceResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = CadenceResult<T>>,
{
    let token = cancel.child_token();
    let fut = call(token.clone());

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CadenceError::Cancelled(phase)),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CadenceError::LifecycleFailure {
                plugin: plugin_id.to_string(),
                phase,
                message: e.to_string(),
            }),
            Err(_) => Err(CadenceError::LifecycleTimeout {
                plugin: plugin_id.to_string(),
                phase,
                timeout_ms: limit.as_millis() as u64,
            }),
        },
    };

    token.cancel();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::StaticPluginLoader;

    async fn orchestrator() -> SessionOrchestrator {
        let registry = Arc::new(PluginRegistry::new(
            Arc::new(StaticPluginLoader::builtins()),
            std::env::temp_dir().join("cadence-orchestrator-test"),
        ));
        registry.discover(&[]).await.unwrap();
        SessionOrchestrator::new(
            registry,
            UpdateBroadcaster::default(),
            SessionTimeouts::default(),
        )
    }

    #[tokio::test]
    async fn test_duplicate_instance_ids_rejected_before_start() {
        let orchestrator = orchestrator().await;
        let preset = SessionPreset::new(
            "dup",
            vec![
                ConfiguredPlugin::new("announcer").with_instance_id("same"),
                ConfiguredPlugin::new("announcer").with_instance_id("same"),
            ],
        );
        let err = orchestrator
            .start_session(preset, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::ValidationError(_)));
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_in_create_phase() {
        let orchestrator = orchestrator().await;
        let preset = SessionPreset::new(
            "missing",
            vec![ConfiguredPlugin::new("nope").with_instance_id("n1")],
        );
        let err = orchestrator
            .start_session(preset, CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CadenceError::SessionStartFailed {
                plugin,
                instance_id,
                phase,
                ..
            } => {
                assert_eq!(plugin, "nope");
                assert_eq!(instance_id, "n1");
                assert_eq!(phase, LifecyclePhase::Create);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop_announcer() {
        let orchestrator = orchestrator().await;
        let mut states = orchestrator.watch_state();
        let preset = SessionPreset::new(
            "Morning",
            vec![ConfiguredPlugin::new("announcer")
                .with_instance_id("a1")
                .with_setting("message", "Good morning")],
        );

        let outcome = orchestrator
            .start_session(preset, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.warnings.is_empty());
        assert!(orchestrator.is_running());
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Running);

        let instance = orchestrator.find_instance("a1").unwrap();
        assert_eq!(instance.setting("message").unwrap().value(), "Good morning");

        let report = orchestrator.stop_session().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.session_id, outcome.session_id);
        assert!(instance.is_disposed());
        assert!(orchestrator.find_instance("a1").is_none());
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }
}
