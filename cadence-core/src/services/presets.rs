use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{CadenceError, CadenceResult};
use crate::models::{SessionPreset, ValidationResult, ValidationStatus};
use crate::plugins::PluginRegistry;
use crate::store::PresetStore;

/// Preset CRUD with validation against the installed plugins.
pub struct PresetService {
    store: Arc<dyn PresetStore>,
    registry: Arc<PluginRegistry>,
}

impl PresetService {
    pub fn new(store: Arc<dyn PresetStore>, registry: Arc<PluginRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn list(&self) -> CadenceResult<Vec<SessionPreset>> {
        self.store.load_all().await
    }

    pub async fn get(&self, id: &str) -> CadenceResult<SessionPreset> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| CadenceError::PresetNotFound(id.to_string()))
    }

    /// Checks the name, instance id uniqueness and that every plugin is installed.
    pub fn validate(&self, preset: &SessionPreset) -> ValidationResult {
        let mut problems = Vec::new();
        let mut field_errors = BTreeMap::new();

        if preset.name.trim().is_empty() {
            problems.push("name must not be empty".to_string());
            field_errors.insert("name".to_string(), "must not be empty".to_string());
        }

        for id in preset.duplicate_instance_ids() {
            problems.push(format!("instance id '{}' is used more than once", id));
            field_errors.insert(format!("plugins.{}", id), "duplicate instance id".to_string());
        }

        for plugin in &preset.plugins {
            if !self.registry.contains(&plugin.plugin_id) {
                problems.push(format!("plugin '{}' is not installed", plugin.plugin_id));
                field_errors.insert(
                    format!("plugins.{}", plugin.instance_id),
                    format!("unknown plugin '{}'", plugin.plugin_id),
                );
            }
        }

        if problems.is_empty() {
            return ValidationResult::ok();
        }
        ValidationResult {
            status: ValidationStatus::Error,
            message: problems.join("; "),
            field_errors,
        }
    }

    pub async fn create(&self, preset: SessionPreset) -> CadenceResult<SessionPreset> {
        self.ensure_valid(&preset)?;
        if self.store.get_by_id(&preset.id).await?.is_some() {
            return Err(CadenceError::AlreadyExists(format!("preset '{}'", preset.id)));
        }

        self.store.save(&preset).await?;
        info!(preset_id = %preset.id, name = %preset.name, "Preset created");
        Ok(preset)
    }

    /// Replaces a stored preset, keeping its creation time and bumping its version.
    pub async fn update(&self, mut preset: SessionPreset) -> CadenceResult<SessionPreset> {
        self.ensure_valid(&preset)?;
        let existing = self.get(&preset.id).await?;

        preset.created_at = existing.created_at;
        preset.version = existing.version;
        preset.touch();

        self.store.save(&preset).await?;
        info!(preset_id = %preset.id, version = preset.version, "Preset updated");
        Ok(preset)
    }

    pub async fn delete(&self, id: &str) -> CadenceResult<()> {
        if !self.store.delete(id).await? {
            return Err(CadenceError::PresetNotFound(id.to_string()));
        }
        info!(preset_id = %id, "Preset deleted");
        Ok(())
    }

    fn ensure_valid(&self, preset: &SessionPreset) -> CadenceResult<()> {
        let validation = self.validate(preset);
        if validation.is_error() {
            return Err(CadenceError::ValidationError(validation.message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfiguredPlugin;
    use crate::plugins::StaticPluginLoader;
    use crate::store::MemoryPresetStore;

    async fn service() -> PresetService {
        let registry = Arc::new(PluginRegistry::new(
            Arc::new(StaticPluginLoader::builtins()),
            std::env::temp_dir().join("cadence-preset-tests"),
        ));
        registry.discover(&[]).await.unwrap();
        PresetService::new(Arc::new(MemoryPresetStore::new()), registry)
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_presets() {
        let service = service().await;

        let unnamed = SessionPreset::new("  ", vec![ConfiguredPlugin::new("announcer")]);
        assert!(matches!(
            service.create(unnamed).await,
            Err(CadenceError::ValidationError(_))
        ));

        let unknown = SessionPreset::new("Unknown", vec![ConfiguredPlugin::new("no-such-plugin")]);
        let validation = service.validate(&unknown);
        assert!(validation.is_error());
        assert!(validation.message.contains("no-such-plugin"));

        let duplicated = SessionPreset::new(
            "Dup",
            vec![
                ConfiguredPlugin::new("announcer").with_instance_id("x"),
                ConfiguredPlugin::new("announcer").with_instance_id("x"),
            ],
        );
        assert!(service.create(duplicated).await.is_err());
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_bumps_version_and_keeps_created_at() {
        let service = service().await;
        let created = service
            .create(
                SessionPreset::new("Focus", vec![ConfiguredPlugin::new("announcer")])
                    .with_id("focus"),
            )
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let mut edited = created.clone();
        edited.name = "Deep focus".to_string();
        edited.created_at = chrono::Utc::now() + chrono::Duration::days(1);
        let updated = service.update(edited).await.unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(service.get("focus").await.unwrap().name, "Deep focus");
    }

    #[tokio::test]
    async fn test_missing_preset_errors() {
        let service = service().await;
        assert!(matches!(
            service.get("ghost").await,
            Err(CadenceError::PresetNotFound(_))
        ));
        assert!(matches!(
            service.delete("ghost").await,
            Err(CadenceError::PresetNotFound(_))
        ));
        let ghost = SessionPreset::new("Ghost", vec![]).with_id("ghost");
        assert!(matches!(
            service.update(ghost).await,
            Err(CadenceError::PresetNotFound(_))
        ));
    }
}
