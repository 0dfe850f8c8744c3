use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CadenceConfig {
    pub host: HostConfig,
    pub session: SessionConfig,
    pub sandbox: SandboxConfig,
    pub broadcast: BroadcastConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directories scanned for `plugin.toml` manifests. Empty means `<data_dir>/plugins`.
    #[serde(default)]
    pub plugin_paths: Vec<PathBuf>,

    /// Roots a symlinked plugin directory may resolve into.
    #[serde(default)]
    pub allowed_symlinks: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_max_sandboxes")]
    pub max_sandboxes: usize,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_value_batch")]
    pub value_batch_ms: u64,

    #[serde(default = "default_choices_throttle")]
    pub choices_throttle_ms: u64,

    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_max_trigger_attempts")]
    pub max_trigger_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    47600
}

fn default_data_dir() -> PathBuf {
    get_data_dir().unwrap_or_else(|| PathBuf::from(".cadence"))
}

fn default_validation_timeout() -> u64 {
    10
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    15
}

fn default_idle_ttl() -> u64 {
    300
}

fn default_max_sandboxes() -> usize {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_value_batch() -> u64 {
    50
}

fn default_choices_throttle() -> u64 {
    1000
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_retry_delay() -> u64 {
    60
}

fn default_max_trigger_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            data_dir: default_data_dir(),
            plugin_paths: Vec::new(),
            allowed_symlinks: Vec::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: default_validation_timeout(),
            startup_timeout_secs: default_startup_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: default_idle_ttl(),
            max_sandboxes: default_max_sandboxes(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            value_batch_ms: default_value_batch(),
            choices_throttle_ms: default_choices_throttle(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_delay_secs: default_retry_delay(),
            max_trigger_attempts: default_max_trigger_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl HostConfig {
    /// Search paths for plugin manifests, falling back to `<data_dir>/plugins`.
    pub fn plugin_search_paths(&self) -> Vec<PathBuf> {
        if self.plugin_paths.is_empty() {
            vec![self.data_dir.join("plugins")]
        } else {
            self.plugin_paths.clone()
        }
    }

    pub fn presets_dir(&self) -> PathBuf {
        self.data_dir.join("presets")
    }

    pub fn schedules_dir(&self) -> PathBuf {
        self.data_dir.join("schedules")
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }

    pub fn discovery_file(&self) -> PathBuf {
        self.data_dir.join("host.json")
    }
}

impl SessionConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl SandboxConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl BroadcastConfig {
    pub fn value_batch_window(&self) -> Duration {
        Duration::from_millis(self.value_batch_ms)
    }

    pub fn choices_throttle_interval(&self) -> Duration {
        Duration::from_millis(self.choices_throttle_ms)
    }
}

impl SchedulerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl CadenceConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        // CADENCE_SESSION__STARTUP_TIMEOUT_SECS -> session.startup_timeout_secs
        builder = builder.add_source(
            Environment::with_prefix("CADENCE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut cadence_config: CadenceConfig = config.try_deserialize()?;

        if let Ok(level) = std::env::var("CADENCE_LOG_LEVEL") {
            cadence_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            cadence_config.logging.level = level;
        }

        if let Ok(dir) = std::env::var("CADENCE_DATA_DIR") {
            cadence_config.host.data_dir = PathBuf::from(dir);
        }

        cadence_config.validate()?;

        Ok(cadence_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.host.port == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "host.port".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.host.bind_address.trim().is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "host.bind_address".to_string(),
            ));
        }

        let positive = [
            (
                "session.validation_timeout_secs",
                self.session.validation_timeout_secs,
            ),
            (
                "session.startup_timeout_secs",
                self.session.startup_timeout_secs,
            ),
            (
                "session.shutdown_timeout_secs",
                self.session.shutdown_timeout_secs,
            ),
            ("sandbox.idle_ttl_secs", self.sandbox.idle_ttl_secs),
            ("sandbox.sweep_interval_secs", self.sandbox.sweep_interval_secs),
            ("broadcast.value_batch_ms", self.broadcast.value_batch_ms),
            (
                "broadcast.choices_throttle_ms",
                self.broadcast.choices_throttle_ms,
            ),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigLoadError::InvalidValue {
                    key: key.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        if self.sandbox.max_sandboxes == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "sandbox.max_sandboxes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.broadcast.subscriber_buffer == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "broadcast.subscriber_buffer".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.scheduler.max_trigger_attempts == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "scheduler.max_trigger_attempts".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host.bind_address, self.host.port)
    }
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("cadence.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".cadence").join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let env_paths = get_dotenv_paths();

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".cadence").join(".env"));
    }

    paths
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cadence"))
}

pub fn get_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("cadence"))
}

pub fn ensure_dir(path: &std::path::Path) -> Result<PathBuf, std::io::Error> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    Ok(path.to_path_buf())
}

pub fn ensure_data_dir() -> Result<PathBuf, std::io::Error> {
    let data_dir = get_data_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine data directory",
        )
    })?;

    ensure_dir(&data_dir)
}
