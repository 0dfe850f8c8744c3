mod file;
mod memory;

pub use file::{FilePresetStore, FileScheduleStore};
pub use memory::{MemoryPresetStore, MemoryScheduleStore};

use async_trait::async_trait;

use crate::error::CadenceResult;
use crate::models::{SessionPreset, SessionSchedule};

#[async_trait]
pub trait PresetStore: Send + Sync {
    async fn load_all(&self) -> CadenceResult<Vec<SessionPreset>>;

    async fn get_by_id(&self, id: &str) -> CadenceResult<Option<SessionPreset>>;

    /// Inserts or overwrites the preset stored under `preset.id`.
    async fn save(&self, preset: &SessionPreset) -> CadenceResult<()>;

    /// Returns `false` when nothing was stored under `id`.
    async fn delete(&self, id: &str) -> CadenceResult<bool>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn load_all(&self) -> CadenceResult<Vec<SessionSchedule>>;

    async fn save(&self, schedule: &SessionSchedule) -> CadenceResult<()>;

    async fn delete(&self, id: &str) -> CadenceResult<bool>;
}
