use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::memory::MemoryStore;
use crate::redis_store::RedisStore;
use crate::traits::DynStore;
use crate::types::CacheType;

/// Create a store instance based on the provided configuration.
///
/// There is no fallback between backends: an unknown identifier or an
/// unreachable Redis server is a startup error.
///
/// The in-memory backend gets a background expiry sweeper when
/// `sweep_interval_secs` is non-zero.
pub async fn create_store(config: &CacheConfig) -> CacheResult<DynStore> {
    config.validate()?;

    match config.cache_type()? {
        CacheType::InMemory => {
            tracing::info!("Using in-memory cache backend");
            let store = Arc::new(MemoryStore::new());
            if config.sweep_interval_secs > 0 {
                store.spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));
            }
            Ok(store)
        }
        CacheType::Redis => {
            tracing::info!(address = %config.redacted_address(), "Connecting to Redis");
            let store = RedisStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}
