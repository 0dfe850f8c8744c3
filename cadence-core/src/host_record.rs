use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CadenceError, CadenceResult};

/// Written into the data directory so local clients can find a running host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub address: String,
    pub port: u16,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

impl DiscoveryRecord {
    pub fn for_current_process(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            pid: std::process::id(),
            started_at: Utc::now(),
            version: crate::VERSION.to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub async fn write(&self, path: &Path) -> CadenceResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), "Wrote discovery record");
        Ok(())
    }

    pub async fn read(path: &Path) -> CadenceResult<Option<Self>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CadenceError::StoreError(format!(
                    "Invalid discovery record {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the record only if it still belongs to this process.
    pub async fn remove_if_owned(path: &Path) -> CadenceResult<bool> {
        match Self::read(path).await {
            Ok(Some(record)) if record.pid == std::process::id() => {
                tokio::fs::remove_file(path).await?;
                debug!(path = %path.display(), "Removed discovery record");
                Ok(true)
            }
            Ok(Some(record)) => {
                warn!(
                    path = %path.display(),
                    pid = record.pid,
                    "Discovery record belongs to another process, leaving it"
                );
                Ok(false)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                // Unreadable leftovers are ours to clean.
                tokio::fs::remove_file(path).await?;
                warn!(error = %e, "Removed unreadable discovery record");
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");

        let record = DiscoveryRecord::for_current_process("127.0.0.1", 47600);
        record.write(&path).await.unwrap();
        assert_eq!(DiscoveryRecord::read(&path).await.unwrap(), Some(record.clone()));
        assert_eq!(record.endpoint(), "127.0.0.1:47600");

        assert!(DiscoveryRecord::remove_if_owned(&path).await.unwrap());
        assert!(!path.exists());
        assert!(!DiscoveryRecord::remove_if_owned(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_record_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.json");

        let mut record = DiscoveryRecord::for_current_process("127.0.0.1", 1);
        record.pid = record.pid.wrapping_add(1);
        record.write(&path).await.unwrap();

        assert!(!DiscoveryRecord::remove_if_owned(&path).await.unwrap());
        assert!(path.exists());
    }
}
