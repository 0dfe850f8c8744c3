use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::traits::PluginFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Productivity,
    Media,
    Communication,
    System,
    #[default]
    Utility,
    Custom,
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginCategory::Productivity => write!(f, "productivity"),
            PluginCategory::Media => write!(f, "media"),
            PluginCategory::Communication => write!(f, "communication"),
            PluginCategory::System => write!(f, "system"),
            PluginCategory::Utility => write!(f, "utility"),
            PluginCategory::Custom => write!(f, "custom"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Option<Platform> {
        if cfg!(target_os = "windows") {
            Some(Platform::Windows)
        } else if cfg!(target_os = "macos") {
            Some(Platform::MacOs)
        } else if cfg!(target_os = "linux") {
            Some(Platform::Linux)
        } else {
            None
        }
    }

    pub fn all() -> Vec<Platform> {
        vec![Platform::Windows, Platform::MacOs, Platform::Linux]
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Linux => write!(f, "linux"),
        }
    }
}

/// A discovered plugin type. Immutable once registered.
#[derive(Clone)]
pub struct PluginDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: PluginCategory,
    /// Empty means every platform.
    pub platforms: Vec<Platform>,
    pub handle: Arc<dyn PluginFactory>,
}

impl PluginDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        handle: Arc<dyn PluginFactory>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: "0.1.0".to_string(),
            category: PluginCategory::default(),
            platforms: Vec::new(),
            handle,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_category(mut self, category: PluginCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }

    pub fn supports_current_platform(&self) -> bool {
        match Platform::current() {
            Some(platform) => self.supports(platform),
            None => self.platforms.is_empty(),
        }
    }

    pub fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
            category: self.category,
            platforms: self.platforms.clone(),
        }
    }
}

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("category", &self.category)
            .field("platforms", &self.platforms)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a [`PluginDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub category: PluginCategory,
    pub platforms: Vec<Platform>,
}
