use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CadenceError, CadenceResult};

use super::types::{Platform, PluginCategory};

/// Contents of a `plugin.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Defaults to `name`.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: PluginCategory,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    /// Key of the in-process factory; defaults to the plugin id.
    #[serde(default)]
    pub factory: Option<String>,
}

impl PluginManifest {
    pub const FILENAME: &'static str = "plugin.toml";

    pub async fn load_from_file(path: &Path) -> CadenceResult<Self> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CadenceError::ManifestInvalid {
                    path: path.display().to_string(),
                    message: format!("Failed to read manifest file: {}", e),
                })?;
        Self::parse(&content).map_err(|e| CadenceError::ManifestInvalid {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn parse(content: &str) -> CadenceResult<Self> {
        toml::from_str(content)
            .map_err(|e| CadenceError::plugin(format!("Failed to parse manifest: {}", e)))
    }

    pub fn validate(&self) -> CadenceResult<()> {
        if self.plugin.name.is_empty() {
            return Err(CadenceError::plugin("Plugin name cannot be empty"));
        }

        if !Self::is_valid_version(&self.plugin.version) {
            return Err(CadenceError::plugin(format!(
                "Invalid version format: {}. Expected semver (e.g., 1.0.0)",
                self.plugin.version
            )));
        }

        if !Self::is_valid_id(&self.plugin_id()) {
            return Err(CadenceError::plugin(format!(
                "Invalid plugin id: {}. Ids must be alphanumeric with hyphens/underscores/dots",
                self.plugin_id()
            )));
        }

        Ok(())
    }

    fn is_valid_version(version: &str) -> bool {
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return false;
        }
        parts.iter().all(|p| p.parse::<u32>().is_ok())
    }

    fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    }

    pub fn plugin_id(&self) -> String {
        self.plugin
            .id
            .clone()
            .unwrap_or_else(|| self.plugin.name.clone())
    }

    pub fn factory_key(&self) -> String {
        self.plugin
            .factory
            .clone()
            .unwrap_or_else(|| self.plugin_id())
    }
}
