use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcast::{
    sandbox_key, InstanceFilter, SubscriptionEnd, UpdateBroadcaster, UpdateSink,
};
use crate::error::{CadenceError, CadenceResult};
use crate::plugins::{
    ActionSnapshot, Persistence, PluginDescriptor, PluginInstance, PluginRegistry, SandboxPool,
    SettingSnapshot,
};
use crate::session::SessionOrchestrator;
use crate::store::PresetStore;

/// Addresses a live instance: one inside the running session, or the
/// design-time sandbox of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ModuleTarget {
    Session { instance_id: String },
    Sandbox { plugin_id: String },
}

impl ModuleTarget {
    pub fn session(instance_id: impl Into<String>) -> Self {
        ModuleTarget::Session {
            instance_id: instance_id.into(),
        }
    }

    pub fn sandbox(plugin_id: impl Into<String>) -> Self {
        ModuleTarget::Sandbox {
            plugin_id: plugin_id.into(),
        }
    }

    /// Key the instance's updates are published under.
    pub fn update_key(&self) -> String {
        match self {
            ModuleTarget::Session { instance_id } => instance_id.clone(),
            ModuleTarget::Sandbox { plugin_id } => sandbox_key(plugin_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub instance_id: String,
    pub plugin_id: String,
    pub settings: Vec<SettingSnapshot>,
    pub actions: Vec<ActionSnapshot>,
}

/// Where a persisted setting change is written back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBack {
    pub preset_id: String,
    pub instance_id: String,
}

pub struct ModuleService {
    registry: Arc<PluginRegistry>,
    orchestrator: Arc<SessionOrchestrator>,
    sandbox: Arc<SandboxPool>,
    broadcaster: UpdateBroadcaster,
    presets: Arc<dyn PresetStore>,
}

impl ModuleService {
    pub fn new(
        registry: Arc<PluginRegistry>,
        orchestrator: Arc<SessionOrchestrator>,
        sandbox: Arc<SandboxPool>,
        broadcaster: UpdateBroadcaster,
        presets: Arc<dyn PresetStore>,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            sandbox,
            broadcaster,
            presets,
        }
    }

    pub fn list_definitions(&self) -> Vec<PluginDescriptor> {
        self.registry
            .list_definitions()
            .iter()
            .map(|d| d.descriptor())
            .collect()
    }

    async fn resolve(&self, target: &ModuleTarget) -> CadenceResult<Arc<PluginInstance>> {
        match target {
            ModuleTarget::Session { instance_id } => self
                .orchestrator
                .find_instance(instance_id)
                .ok_or_else(|| CadenceError::InstanceNotFound(instance_id.clone())),
            ModuleTarget::Sandbox { plugin_id } => self.sandbox.get_or_create(plugin_id).await,
        }
    }

    pub async fn snapshot(&self, target: &ModuleTarget) -> CadenceResult<ModuleSnapshot> {
        let instance = self.resolve(target).await?;
        Ok(ModuleSnapshot {
            instance_id: target.update_key(),
            plugin_id: instance.plugin_id().to_string(),
            settings: instance.settings().iter().map(|s| s.snapshot()).collect(),
            actions: instance.actions().iter().map(|a| a.snapshot()).collect(),
        })
    }

    pub async fn invoke_action(
        &self,
        target: &ModuleTarget,
        action_key: &str,
        cancel: CancellationToken,
    ) -> CadenceResult<()> {
        debug!(target = ?target, action = %action_key, "Invoking action");
        match target {
            ModuleTarget::Sandbox { plugin_id } => {
                self.sandbox
                    .invoke_design_time_action(plugin_id, action_key, cancel)
                    .await
            }
            ModuleTarget::Session { .. } => {
                let instance = self.resolve(target).await?;
                instance.invoke_action(action_key, cancel).await
            }
        }
    }

    /// Sets a setting value. Persisted settings are also written into the
    /// stored preset when `write_back` is given.
    ///
    /// Returns whether the live value changed.
    pub async fn update_setting(
        &self,
        target: &ModuleTarget,
        key: &str,
        value: &str,
        write_back: Option<&WriteBack>,
    ) -> CadenceResult<bool> {
        let instance = self.resolve(target).await?;
        let setting = instance
            .setting(key)
            .ok_or_else(|| CadenceError::SettingNotFound {
                instance: target.update_key(),
                key: key.to_string(),
            })?;
        if setting.is_read_only() {
            return Err(CadenceError::SettingReadOnly {
                instance: target.update_key(),
                key: key.to_string(),
            });
        }

        let changed = setting.set_value(value);
        if setting.persistence() == Persistence::Persisted {
            if let Some(write_back) = write_back {
                self.write_back(write_back, key, value).await?;
            }
        }
        Ok(changed)
    }

    async fn write_back(&self, target: &WriteBack, key: &str, value: &str) -> CadenceResult<()> {
        let mut preset = self
            .presets
            .get_by_id(&target.preset_id)
            .await?
            .ok_or_else(|| CadenceError::PresetNotFound(target.preset_id.clone()))?;
        let plugin = preset
            .find_plugin_mut(&target.instance_id)
            .ok_or_else(|| CadenceError::InstanceNotFound(target.instance_id.clone()))?;

        if plugin.settings.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        plugin.settings.insert(key.to_string(), value.to_string());
        preset.touch();
        self.presets.save(&preset).await?;

        info!(
            preset_id = %target.preset_id,
            instance_id = %target.instance_id,
            key = %key,
            "Setting written back to preset"
        );
        Ok(())
    }

    /// Streams property updates into `sink` until cancelled, replaced or the
    /// sink fails.
    pub async fn subscribe_updates<S>(
        &self,
        subscriber_id: &str,
        filter: InstanceFilter,
        sink: S,
        cancel: CancellationToken,
    ) -> SubscriptionEnd
    where
        S: UpdateSink,
    {
        self.broadcaster
            .subscribe(subscriber_id, filter, sink, cancel)
            .await
    }
}
