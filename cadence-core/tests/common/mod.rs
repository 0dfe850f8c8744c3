use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::plugins::StaticPluginLoader;
use cadence_core::{
    Action, CadenceError, CadenceResult, ConfiguredPlugin, InstanceContext, Plugin,
    PluginDefinition, PluginRegistry, SessionOrchestrator, SessionPreset, SessionTimeouts,
    Setting, UpdateBroadcaster, ValidationResult,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Ordered record of lifecycle calls, as `"<plugin>:<call>"`.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, plugin_id: &str, call: &str) {
        self.0.lock().unwrap().push(format!("{plugin_id}:{call}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    FailInitialize,
    SlowInitialize,
    FailValidation,
    WarnValidation,
    FailStart,
    SlowStart,
    HangStart,
    FailEnd,
    HangEnd,
}

pub struct MockPlugin {
    id: String,
    fault: Fault,
    log: CallLog,
    level: Setting,
    ping: Action,
}

impl MockPlugin {
    pub fn new(id: &str, fault: Fault, log: CallLog) -> Self {
        Self {
            id: id.to_string(),
            fault,
            log,
            level: Setting::builder("level", "Level").default_value("0").build(),
            ping: Action::new("ping", "Ping"),
        }
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn settings(&self) -> Vec<Setting> {
        vec![self.level.clone()]
    }

    fn actions(&self) -> Vec<Action> {
        vec![self.ping.clone()]
    }

    async fn initialize(
        &self,
        _ctx: &InstanceContext,
        _cancel: CancellationToken,
    ) -> CadenceResult<()> {
        self.log.record(&self.id, "initialize");
        match self.fault {
            Fault::FailInitialize => {
                Err(CadenceError::PluginError("device unavailable".to_string()))
            }
            Fault::SlowInitialize => {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn validate_settings(
        &self,
        _cancel: CancellationToken,
    ) -> CadenceResult<ValidationResult> {
        self.log.record(&self.id, "validate");
        Ok(match self.fault {
            Fault::FailValidation => {
                ValidationResult::error("token missing").with_field_error("level", "required")
            }
            Fault::WarnValidation => ValidationResult::warning("level is unusually low"),
            _ => ValidationResult::ok(),
        })
    }

    async fn on_session_start(&self, _cancel: CancellationToken) -> CadenceResult<()> {
        self.log.record(&self.id, "start");
        match self.fault {
            Fault::FailStart => Err(CadenceError::PluginError("refused to start".to_string())),
            Fault::SlowStart => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }
            Fault::HangStart => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_session_end(&self, _cancel: CancellationToken) -> CadenceResult<()> {
        self.log.record(&self.id, "end");
        match self.fault {
            Fault::FailEnd => Err(CadenceError::PluginError("refused to end".to_string())),
            Fault::HangEnd => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_action(&self, key: &str, _cancel: CancellationToken) -> CadenceResult<()> {
        self.log.record(&self.id, &format!("action:{key}"));
        Ok(())
    }

    fn dispose(&self) {
        self.log.record(&self.id, "dispose");
    }
}

pub fn mock_definition(id: &str, fault: Fault, log: &CallLog) -> PluginDefinition {
    let plugin_id = id.to_string();
    let log = log.clone();
    let factory = move |_ctx: &InstanceContext| -> CadenceResult<Box<dyn Plugin>> {
        log.record(&plugin_id, "create");
        Ok(Box::new(MockPlugin::new(&plugin_id, fault, log.clone())))
    };
    PluginDefinition::new(id, format!("Mock {id}"), Arc::new(factory))
}

pub fn test_timeouts() -> SessionTimeouts {
    SessionTimeouts {
        validation: Duration::from_secs(1),
        startup: Duration::from_secs(2),
        shutdown: Duration::from_secs(1),
    }
}

pub struct Harness {
    pub registry: Arc<PluginRegistry>,
    pub broadcaster: UpdateBroadcaster,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub log: CallLog,
    _dir: TempDir,
}

/// Registry, broadcaster and orchestrator over mock plugins with the given faults.
pub fn harness(plugins: &[(&str, Fault)]) -> Harness {
    let dir = TempDir::new().unwrap();
    let log = CallLog::default();
    let registry = Arc::new(PluginRegistry::new(
        Arc::new(StaticPluginLoader::new(Vec::new())),
        dir.path().join("instances"),
    ));
    for (id, fault) in plugins {
        registry.register(mock_definition(id, *fault, &log));
    }
    let broadcaster = UpdateBroadcaster::default();
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&registry),
        broadcaster.clone(),
        test_timeouts(),
    ));
    Harness {
        registry,
        broadcaster,
        orchestrator,
        log,
        _dir: dir,
    }
}

/// A preset with one slot per plugin id; instance ids are `<plugin>-1`.
pub fn preset(name: &str, plugin_ids: &[&str]) -> SessionPreset {
    SessionPreset::new(
        name,
        plugin_ids
            .iter()
            .map(|id| ConfiguredPlugin::new(*id).with_instance_id(format!("{id}-1")))
            .collect(),
    )
    .with_id(name.to_lowercase())
}

pub async fn wait_for_subscribers(broadcaster: &UpdateBroadcaster, count: usize) {
    while broadcaster.subscriber_count() < count {
        tokio::task::yield_now().await;
    }
}
