use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CadenceResult;
use crate::models::{SessionPreset, SessionSchedule};

use super::{PresetStore, ScheduleStore};

/// Volatile preset store.
#[derive(Debug, Default)]
pub struct MemoryPresetStore {
    presets: RwLock<HashMap<String, SessionPreset>>,
}

impl MemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presets(presets: impl IntoIterator<Item = SessionPreset>) -> Self {
        Self {
            presets: RwLock::new(presets.into_iter().map(|p| (p.id.clone(), p)).collect()),
        }
    }
}

#[async_trait]
impl PresetStore for MemoryPresetStore {
    async fn load_all(&self) -> CadenceResult<Vec<SessionPreset>> {
        let mut presets: Vec<SessionPreset> = self.presets.read().await.values().cloned().collect();
        presets.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(presets)
    }

    async fn get_by_id(&self, id: &str) -> CadenceResult<Option<SessionPreset>> {
        Ok(self.presets.read().await.get(id).cloned())
    }

    async fn save(&self, preset: &SessionPreset) -> CadenceResult<()> {
        self.presets
            .write()
            .await
            .insert(preset.id.clone(), preset.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> CadenceResult<bool> {
        Ok(self.presets.write().await.remove(id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    schedules: RwLock<HashMap<String, SessionSchedule>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn load_all(&self) -> CadenceResult<Vec<SessionSchedule>> {
        let mut schedules: Vec<SessionSchedule> =
            self.schedules.read().await.values().cloned().collect();
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(schedules)
    }

    async fn save(&self, schedule: &SessionSchedule) -> CadenceResult<()> {
        self.schedules
            .write()
            .await
            .insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> CadenceResult<bool> {
        Ok(self.schedules.write().await.remove(id).is_some())
    }
}
