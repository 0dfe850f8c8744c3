use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CadenceError, CadenceResult};
use crate::models::{SessionPreset, SessionSchedule};

use super::{PresetStore, ScheduleStore};

/// One JSON document per id inside a single directory.
#[derive(Debug, Clone)]
struct JsonDirectory {
    dir: PathBuf,
}

impl JsonDirectory {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> CadenceResult<PathBuf> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && !id.contains('\0');
        if !valid {
            return Err(CadenceError::ValidationError(format!(
                "'{}' cannot be used as a file name",
                id
            )));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    async fn read_all<T: DeserializeOwned>(&self) -> CadenceResult<Vec<T>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut documents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_document(&path).await {
                Ok(document) => documents.push(document),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                }
            }
        }
        Ok(documents)
    }

    async fn read<T: DeserializeOwned>(&self, id: &str) -> CadenceResult<Option<T>> {
        let path = self.path_for(id)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => read_document(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + Sync>(&self, id: &str, document: &T) -> CadenceResult<()> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_vec_pretty(document)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), "Wrote document");
        Ok(())
    }

    async fn remove(&self, id: &str) -> CadenceResult<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> CadenceResult<T> {
    let bytes = tokio::fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        CadenceError::StoreError(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Presets stored as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FilePresetStore {
    files: JsonDirectory,
}

impl FilePresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            files: JsonDirectory::new(dir),
        }
    }
}

#[async_trait]
impl PresetStore for FilePresetStore {
    async fn load_all(&self) -> CadenceResult<Vec<SessionPreset>> {
        let mut presets: Vec<SessionPreset> = self.files.read_all().await?;
        presets.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(presets)
    }

    async fn get_by_id(&self, id: &str) -> CadenceResult<Option<SessionPreset>> {
        self.files.read(id).await
    }

    async fn save(&self, preset: &SessionPreset) -> CadenceResult<()> {
        self.files.write(&preset.id, preset).await
    }

    async fn delete(&self, id: &str) -> CadenceResult<bool> {
        self.files.remove(id).await
    }
}

/// Schedules stored as `<dir>/<id>.json`, including their `last_run`.
#[derive(Debug, Clone)]
pub struct FileScheduleStore {
    files: JsonDirectory,
}

impl FileScheduleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            files: JsonDirectory::new(dir),
        }
    }
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn load_all(&self) -> CadenceResult<Vec<SessionSchedule>> {
        let mut schedules: Vec<SessionSchedule> = self.files.read_all().await?;
        schedules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(schedules)
    }

    async fn save(&self, schedule: &SessionSchedule) -> CadenceResult<()> {
        self.files.write(&schedule.id, schedule).await
    }

    async fn delete(&self, id: &str) -> CadenceResult<bool> {
        self.files.remove(id).await
    }
}
