use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CadenceError, CadenceResult};

use super::context::InstanceContext;
use super::instance::PluginInstance;
use super::loader::PluginLoader;
use super::types::PluginDefinition;

/// Discovers plugin definitions and creates isolated instances from them.
pub struct PluginRegistry {
    loader: Arc<dyn PluginLoader>,
    definitions: RwLock<HashMap<String, Arc<PluginDefinition>>>,
    instances_root: PathBuf,
    allowed_symlinks: Vec<PathBuf>,
    root_token: CancellationToken,
}

impl PluginRegistry {
    pub fn new(loader: Arc<dyn PluginLoader>, instances_root: impl Into<PathBuf>) -> Self {
        Self {
            loader,
            definitions: RwLock::new(HashMap::new()),
            instances_root: instances_root.into(),
            allowed_symlinks: Vec::new(),
            root_token: CancellationToken::new(),
        }
    }

    pub fn with_allowed_symlinks(mut self, allowed: Vec<PathBuf>) -> Self {
        self.allowed_symlinks = allowed;
        self
    }

    /// Instance tokens are children of this token.
    pub fn with_root_token(mut self, token: CancellationToken) -> Self {
        self.root_token = token;
        self
    }

    /// Replaces the definition table with what the loader finds, keeping only
    /// definitions that support the current platform.
    pub async fn discover(
        &self,
        search_paths: &[PathBuf],
    ) -> CadenceResult<Vec<Arc<PluginDefinition>>> {
        let loaded = self
            .loader
            .load_definitions(search_paths, &self.allowed_symlinks)
            .await?;

        let mut table = HashMap::with_capacity(loaded.len());
        for definition in loaded {
            if !definition.supports_current_platform() {
                debug!(
                    plugin_id = %definition.id,
                    "Skipping plugin not supported on this platform"
                );
                continue;
            }
            table
                .entry(definition.id.clone())
                .or_insert_with(|| Arc::new(definition));
        }

        let mut discovered: Vec<Arc<PluginDefinition>> = table.values().cloned().collect();
        discovered.sort_by(|a, b| a.id.cmp(&b.id));

        *self
            .definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = table;

        info!("Discovered {} plugin definitions", discovered.len());
        Ok(discovered)
    }

    /// Adds or replaces a single definition outside of discovery.
    pub fn register(&self, definition: PluginDefinition) -> Arc<PluginDefinition> {
        let definition = Arc::new(definition);
        self.definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(definition.id.clone(), Arc::clone(&definition));
        definition
    }

    pub fn get_definition(&self, plugin_id: &str) -> Option<Arc<PluginDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(plugin_id)
            .cloned()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.get_definition(plugin_id).is_some()
    }

    pub fn list_definitions(&self) -> Vec<Arc<PluginDefinition>> {
        let mut definitions: Vec<Arc<PluginDefinition>> = self
            .definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        definitions.sort_by(|a, b| a.id.cmp(&b.id));
        definitions
    }

    /// Creates a fresh instance under a generated instance key.
    pub fn create_instance(&self, plugin_id: &str) -> CadenceResult<PluginInstance> {
        self.create_instance_with_key(plugin_id, &Uuid::new_v4().to_string())
    }

    /// Creates a fresh instance with its own context. Performs no I/O.
    pub fn create_instance_with_key(
        &self,
        plugin_id: &str,
        instance_key: &str,
    ) -> CadenceResult<PluginInstance> {
        let definition = self
            .get_definition(plugin_id)
            .ok_or_else(|| CadenceError::PluginNotFound(plugin_id.to_string()))?;

        let context = InstanceContext::new(
            &definition.id,
            instance_key,
            &self.instances_root,
            &self.root_token,
        )?;
        let plugin =
            definition
                .handle
                .create(&context)
                .map_err(|e| CadenceError::PluginLoadFailed {
                    name: definition.id.clone(),
                    message: e.to_string(),
                })?;

        debug!(
            plugin_id = %definition.id,
            instance_id = %instance_key,
            "Created plugin instance"
        );
        Ok(PluginInstance::new(definition, context, plugin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::loader::StaticPluginLoader;
    use crate::plugins::types::Platform;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(StaticPluginLoader::builtins()), "/tmp/cadence-test")
    }

    #[tokio::test]
    async fn test_discover_replaces_table() {
        let registry = registry();
        assert!(registry.list_definitions().is_empty());

        let discovered = registry.discover(&[]).await.unwrap();
        assert!(!discovered.is_empty());
        assert!(registry.contains("announcer"));
        assert_eq!(registry.list_definitions().len(), discovered.len());
    }

    #[tokio::test]
    async fn test_discover_filters_platforms() {
        let announcer = crate::plugins::builtin::builtin_definitions().remove(0);
        let mut foreign = announcer.clone().with_platforms(
            Platform::all()
                .into_iter()
                .filter(|p| Some(*p) != Platform::current())
                .collect(),
        );
        foreign.id = "foreign".to_string();

        let registry = PluginRegistry::new(
            Arc::new(StaticPluginLoader::new(vec![announcer, foreign])),
            "/tmp/cadence-test",
        );
        registry.discover(&[]).await.unwrap();
        assert!(registry.contains("announcer"));
        assert!(!registry.contains("foreign"));
    }

    #[tokio::test]
    async fn test_create_instance_unknown_id() {
        let registry = registry();
        registry.discover(&[]).await.unwrap();
        let err = registry.create_instance("does-not-exist").unwrap_err();
        assert!(matches!(err, CadenceError::PluginNotFound(ref id) if id == "does-not-exist"));
    }

    #[tokio::test]
    async fn test_instances_are_distinct() {
        let registry = registry();
        registry.discover(&[]).await.unwrap();

        let a = registry.create_instance("announcer").unwrap();
        let b = registry.create_instance("announcer").unwrap();
        assert!(!std::ptr::eq(&a, &b));
        assert_ne!(a.instance_key(), b.instance_key());
        assert_ne!(a.context().data_dir(), b.context().data_dir());

        a.settings()[0].set_value("only a");
        assert_ne!(a.settings()[0].value(), b.settings()[0].value());
    }
}
