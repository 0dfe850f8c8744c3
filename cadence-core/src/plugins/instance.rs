use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CadenceError, CadenceResult};
use crate::models::ValidationResult;

use super::context::InstanceContext;
use super::settings::{Action, Setting};
use super::traits::DynPlugin;
use super::types::PluginDefinition;

/// A live plugin object bound to its [`InstanceContext`].
///
/// Disposal happens exactly once: either through [`PluginInstance::dispose`]
/// or when the last owner drops the instance.
pub struct PluginInstance {
    definition: Arc<PluginDefinition>,
    context: InstanceContext,
    plugin: DynPlugin,
    settings: Vec<Setting>,
    actions: Vec<Action>,
    disposed: AtomicBool,
}

impl PluginInstance {
    pub(crate) fn new(
        definition: Arc<PluginDefinition>,
        context: InstanceContext,
        plugin: DynPlugin,
    ) -> Self {
        let settings = plugin.settings();
        let actions = plugin.actions();
        Self {
            definition,
            context,
            plugin,
            settings,
            actions,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn instance_key(&self) -> &str {
        self.context.instance_key()
    }

    pub fn plugin_id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &Arc<PluginDefinition> {
        &self.definition
    }

    pub fn context(&self) -> &InstanceContext {
        &self.context
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    pub fn setting(&self, key: &str) -> Option<&Setting> {
        self.settings.iter().find(|s| s.key() == key)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, key: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.key() == key)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> CadenceResult<()> {
        if self.is_disposed() {
            return Err(CadenceError::InstanceDisposed(
                self.instance_key().to_string(),
            ));
        }
        Ok(())
    }

    /// Writes configured values into matching settings. Unknown keys are skipped.
    pub fn apply_settings(&self, values: &BTreeMap<String, String>) -> CadenceResult<()> {
        self.ensure_live()?;
        for (key, value) in values {
            match self.setting(key) {
                Some(setting) => {
                    setting.set_value(value.clone());
                }
                None => debug!(
                    plugin_id = %self.plugin_id(),
                    instance_id = %self.instance_key(),
                    setting = %key,
                    "Ignoring unknown configured setting"
                ),
            }
        }
        Ok(())
    }

    pub async fn initialize(&self, cancel: CancellationToken) -> CadenceResult<()> {
        self.ensure_live()?;
        self.plugin.initialize(&self.context, cancel).await
    }

    pub async fn validate_settings(
        &self,
        cancel: CancellationToken,
    ) -> CadenceResult<ValidationResult> {
        self.ensure_live()?;
        self.plugin.validate_settings(cancel).await
    }

    pub async fn on_session_start(&self, cancel: CancellationToken) -> CadenceResult<()> {
        self.ensure_live()?;
        self.plugin.on_session_start(cancel).await
    }

    pub async fn on_session_end(&self, cancel: CancellationToken) -> CadenceResult<()> {
        self.ensure_live()?;
        self.plugin.on_session_end(cancel).await
    }

    pub async fn invoke_action(&self, key: &str, cancel: CancellationToken) -> CadenceResult<()> {
        self.ensure_live()?;
        let action = self.action(key).ok_or_else(|| CadenceError::ActionNotFound {
            instance: self.instance_key().to_string(),
            action: key.to_string(),
        })?;
        if !action.is_enabled() {
            return Err(CadenceError::ActionDisabled {
                instance: self.instance_key().to_string(),
                action: key.to_string(),
            });
        }
        action.record_invocation();
        self.plugin.on_action(key, cancel).await
    }

    /// Closes cells and context, then disposes the plugin. Returns false if
    /// the instance was already disposed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for setting in &self.settings {
            setting.close();
        }
        for action in &self.actions {
            action.close();
        }
        self.context.close();
        self.plugin.dispose();
        debug!(
            plugin_id = %self.plugin_id(),
            instance_id = %self.instance_key(),
            "Plugin instance disposed"
        );
        true
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        if self.dispose() {
            warn!(
                plugin_id = %self.definition.id,
                instance_id = %self.context.instance_key(),
                "Plugin instance dropped without explicit dispose"
            );
        }
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin_id", &self.definition.id)
            .field("instance_key", &self.context.instance_key())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
