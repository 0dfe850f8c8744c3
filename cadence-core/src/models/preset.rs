use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// One plugin slot inside a preset, with the settings the user configured for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredPlugin {
    /// Stable across edits of the preset; unique within it.
    pub instance_id: String,
    pub plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl ConfiguredPlugin {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            plugin_id: plugin_id.into(),
            custom_name: None,
            settings: BTreeMap::new(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.plugin_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPreset {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub plugins: Vec<ConfiguredPlugin>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl SessionPreset {
    pub fn new(name: impl Into<String>, plugins: Vec<ConfiguredPlugin>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            version: 1,
            plugins,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Instance ids that occur more than once, in first-repeat order.
    pub fn duplicate_instance_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for plugin in &self.plugins {
            if !seen.insert(plugin.instance_id.as_str())
                && !duplicates.contains(&plugin.instance_id)
            {
                duplicates.push(plugin.instance_id.clone());
            }
        }
        duplicates
    }

    pub fn find_plugin(&self, instance_id: &str) -> Option<&ConfiguredPlugin> {
        self.plugins.iter().find(|p| p.instance_id == instance_id)
    }

    pub fn find_plugin_mut(&mut self, instance_id: &str) -> Option<&mut ConfiguredPlugin> {
        self.plugins.iter_mut().find(|p| p.instance_id == instance_id)
    }

    /// Marks the preset as edited: bumps the version and refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.version = self.version.saturating_add(1);
        self.updated_at = Utc::now();
    }
}
