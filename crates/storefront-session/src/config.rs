use serde::{Deserialize, Serialize};
use std::time::Duration;
use storefront_cache::CacheConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(String),

    #[error("config deserialize error: {0}")]
    Deserialize(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Store backend selection and connection settings
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// `/ping` flow tuning
    #[serde(default)]
    pub ping: PingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Cache validation
        self.cache
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        // Coordinator validation
        if self.coordinator.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.op_timeout_ms must be > 0".into(),
            ));
        }
        // Ping validation
        if self.ping.rate_limit == 0 {
            return Err(ConfigError::Invalid("ping.rate_limit must be > 0".into()));
        }
        if self.ping.window_secs == 0 {
            return Err(ConfigError::Invalid("ping.window_secs must be > 0".into()));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator.op_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_op_timeout_ms() -> u64 {
    2000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: default_op_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingConfig {
    /// Calls admitted per caller and window
    #[serde(default = "default_ping_rate_limit")]
    pub rate_limit: usize,
    #[serde(default = "default_ping_window_secs")]
    pub window_secs: u64,
    /// Time the critical section is held, in milliseconds
    #[serde(default = "default_ping_hold_ms")]
    pub hold_ms: u64,
}

fn default_ping_rate_limit() -> usize {
    2
}

fn default_ping_window_secs() -> u64 {
    60
}

fn default_ping_hold_ms() -> u64 {
    5000
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_ping_rate_limit(),
            window_secs: default_ping_window_secs(),
            hold_ms: default_ping_hold_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "storefront.toml";

    /// Loads configuration from an optional TOML file plus environment
    /// overrides, e.g. `STOREFRONT__CACHE__BACKEND=redis`.
    ///
    /// A missing file is not an error; every section has defaults.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(
            Environment::with_prefix("STOREFRONT")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Build(e.to_string()))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
        merged.validate()?;
        Ok(merged)
    }
}
