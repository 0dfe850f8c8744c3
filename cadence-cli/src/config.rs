use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cadence_core::{CadenceConfig, CadenceError};

/// Loads the host configuration, honouring the global `--config` and
/// `--data-dir` flags.
pub fn load_config(config_file: Option<&Path>, data_dir: Option<&Path>) -> Result<CadenceConfig> {
    let mut config = match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(CadenceError::ConfigFileNotFound(path.display().to_string()).into());
            }
            CadenceConfig::load_from_paths(vec![path.to_path_buf()])
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => CadenceConfig::load().context("Failed to load configuration")?,
    };

    if let Some(dir) = data_dir {
        config.host.data_dir = PathBuf::from(dir);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/cadence.toml")), None).unwrap_err();
        let err = err.downcast_ref::<CadenceError>().unwrap();
        assert!(matches!(err, CadenceError::ConfigFileNotFound(path) if path.contains("cadence.toml")));
        assert!(err.user_suggestion().is_some());
    }

    #[test]
    fn test_explicit_file_and_data_dir_override() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cadence.toml");
        std::fs::write(&path, "[sandbox]\nmax_sandboxes = 3\n").unwrap();

        let config = load_config(Some(&path), Some(temp.path())).unwrap();

        assert_eq!(config.sandbox.max_sandboxes, 3);
        assert_eq!(config.host.data_dir, temp.path());
    }
}
