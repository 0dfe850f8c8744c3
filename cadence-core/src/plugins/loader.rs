use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{CadenceError, CadenceResult};

use super::builtin;
use super::manifest::PluginManifest;
use super::traits::PluginFactory;
use super::types::PluginDefinition;

/// Produces plugin definitions for the registry.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load_definitions(
        &self,
        search_paths: &[PathBuf],
        allowed_symlinks: &[PathBuf],
    ) -> CadenceResult<Vec<PluginDefinition>>;
}

/// In-process factories that manifests bind to by key.
#[derive(Clone, Default)]
pub struct FactoryCatalog {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for (key, factory) in builtin::builtin_factories() {
            catalog.register(key, factory);
        }
        catalog
    }

    pub fn register(&mut self, key: impl Into<String>, factory: Arc<dyn PluginFactory>) {
        self.factories.insert(key.into(), factory);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Scans search paths for `<dir>/plugin.toml` manifests.
///
/// A symlinked plugin directory is only followed when its target resolves
/// under one of the allowed roots.
pub struct ManifestPluginLoader {
    catalog: FactoryCatalog,
}

impl ManifestPluginLoader {
    pub fn new(catalog: FactoryCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &FactoryCatalog {
        &self.catalog
    }

    async fn scan_dir(
        &self,
        search_path: &Path,
        allowed_roots: &[PathBuf],
    ) -> CadenceResult<Vec<PluginDefinition>> {
        let mut definitions = Vec::new();
        let mut entries = tokio::fs::read_dir(search_path).await.map_err(|e| {
            CadenceError::plugin(format!(
                "Failed to read plugin directory {:?}: {}",
                search_path, e
            ))
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            CadenceError::plugin(format!("Failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            let meta = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", path, e);
                    continue;
                }
            };

            if meta.file_type().is_symlink() && !symlink_allowed(&path, allowed_roots).await {
                warn!("Skipping symlinked plugin outside allowed roots: {:?}", path);
                continue;
            }

            if !path.is_dir() {
                continue;
            }

            let manifest_path = path.join(PluginManifest::FILENAME);
            if !manifest_path.exists() {
                debug!("Skipping directory without manifest: {:?}", path);
                continue;
            }

            match self.load_one(&manifest_path).await {
                Ok(definition) => definitions.push(definition),
                Err(e) => warn!("Failed to load plugin from {:?}: {}", path, e),
            }
        }

        Ok(definitions)
    }

    async fn load_one(&self, manifest_path: &Path) -> CadenceResult<PluginDefinition> {
        let manifest = PluginManifest::load_from_file(manifest_path).await?;
        manifest
            .validate()
            .map_err(|e| CadenceError::ManifestInvalid {
                path: manifest_path.display().to_string(),
                message: e.to_string(),
            })?;

        let plugin_id = manifest.plugin_id();
        let factory_key = manifest.factory_key();
        let factory =
            self.catalog
                .get(&factory_key)
                .ok_or_else(|| CadenceError::PluginLoadFailed {
                    name: plugin_id.clone(),
                    message: format!("no factory registered under '{}'", factory_key),
                })?;

        Ok(PluginDefinition::new(plugin_id, manifest.plugin.name, factory)
            .with_description(manifest.plugin.description)
            .with_version(manifest.plugin.version)
            .with_category(manifest.plugin.category)
            .with_platforms(manifest.plugin.platforms))
    }
}

#[async_trait]
impl PluginLoader for ManifestPluginLoader {
    async fn load_definitions(
        &self,
        search_paths: &[PathBuf],
        allowed_symlinks: &[PathBuf],
    ) -> CadenceResult<Vec<PluginDefinition>> {
        let mut allowed_roots = Vec::with_capacity(allowed_symlinks.len());
        for root in allowed_symlinks {
            match tokio::fs::canonicalize(root).await {
                Ok(path) => allowed_roots.push(path),
                Err(e) => debug!("Ignoring unresolvable symlink root {:?}: {}", root, e),
            }
        }

        let mut definitions = Vec::new();
        for search_path in search_paths {
            if !search_path.is_dir() {
                debug!("Plugin search path does not exist: {:?}", search_path);
                continue;
            }
            definitions.extend(self.scan_dir(search_path, &allowed_roots).await?);
        }

        info!(
            "Loaded {} plugin manifests from {} search paths",
            definitions.len(),
            search_paths.len()
        );
        Ok(definitions)
    }
}

async fn symlink_allowed(path: &Path, allowed_roots: &[PathBuf]) -> bool {
    match tokio::fs::canonicalize(path).await {
        Ok(target) => allowed_roots.iter().any(|root| target.starts_with(root)),
        Err(_) => false,
    }
}

/// Serves definitions built in-process.
pub struct StaticPluginLoader {
    definitions: Vec<PluginDefinition>,
}

impl StaticPluginLoader {
    pub fn new(definitions: Vec<PluginDefinition>) -> Self {
        Self { definitions }
    }

    pub fn builtins() -> Self {
        Self::new(builtin::builtin_definitions())
    }
}

#[async_trait]
impl PluginLoader for StaticPluginLoader {
    async fn load_definitions(
        &self,
        _search_paths: &[PathBuf],
        _allowed_symlinks: &[PathBuf],
    ) -> CadenceResult<Vec<PluginDefinition>> {
        Ok(self.definitions.clone())
    }
}

/// Concatenates the output of several loaders; earlier loaders win on id clashes.
pub struct ChainedPluginLoader {
    loaders: Vec<Arc<dyn PluginLoader>>,
}

impl ChainedPluginLoader {
    pub fn new(loaders: Vec<Arc<dyn PluginLoader>>) -> Self {
        Self { loaders }
    }
}

#[async_trait]
impl PluginLoader for ChainedPluginLoader {
    async fn load_definitions(
        &self,
        search_paths: &[PathBuf],
        allowed_symlinks: &[PathBuf],
    ) -> CadenceResult<Vec<PluginDefinition>> {
        let mut definitions: Vec<PluginDefinition> = Vec::new();
        for loader in &self.loaders {
            for definition in loader
                .load_definitions(search_paths, allowed_symlinks)
                .await?
            {
                if definitions.iter().any(|d| d.id == definition.id) {
                    warn!(plugin_id = %definition.id, "Duplicate plugin id, keeping first");
                    continue;
                }
                definitions.push(definition);
            }
        }
        Ok(definitions)
    }
}
