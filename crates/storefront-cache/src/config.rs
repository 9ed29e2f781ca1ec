use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::types::CacheType;

/// Store backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Backend identifier: "in_memory" or "redis".
    /// Kept as a string so unknown values fail in the factory with a clear error.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Redis host
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redis ACL username
    #[serde(default)]
    pub username: Option<String>,

    /// Redis password
    #[serde(default)]
    pub password: Option<String>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Interval between in-memory expiry sweeps in seconds (0 disables the sweeper)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_backend() -> String {
    CacheType::InMemory.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            pool_size: default_pool_size(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// The selected backend.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::UnsupportedBackend` for unknown identifiers.
    pub fn cache_type(&self) -> CacheResult<CacheType> {
        self.backend.parse()
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.cache_type()? == CacheType::Redis {
            if self.host.trim().is_empty() {
                return Err(CacheError::Config("cache.host must not be empty".into()));
            }
            if self.port == 0 {
                return Err(CacheError::Config("cache.port must be > 0".into()));
            }
            if self.pool_size == 0 {
                return Err(CacheError::Config("cache.pool_size must be > 0".into()));
            }
            if self.timeout_ms == 0 {
                return Err(CacheError::Config("cache.timeout_ms must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Builds the Redis connection URL, percent-encoding credentials.
    pub fn redis_url(&self) -> CacheResult<String> {
        let mut url = url::Url::parse(&format!("redis://{}:{}", self.host, self.port))
            .map_err(|e| CacheError::Config(format!("invalid redis address: {e}")))?;
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(username)
                .map_err(|_| CacheError::Config("invalid redis username".into()))?;
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| CacheError::Config("invalid redis password".into()))?;
        }
        Ok(url.to_string())
    }

    /// The connection address with credentials removed, for logging.
    pub fn redacted_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
