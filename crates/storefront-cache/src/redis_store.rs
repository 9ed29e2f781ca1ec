//! Networked store backed by Redis.
//!
//! Mutual exclusion is delegated entirely to the server: every operation is a
//! single native command, except the rate-limit ledger step which runs as one
//! Lua script so the length check, push and expiry refresh cannot interleave
//! with another caller.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::{AsyncCommands, RedisError, Script};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::metrics;
use crate::traits::{KeyValueStore, rank_scores};
use crate::types::{CacheType, effective_ttl};

const BACKEND: &str = "redis";

/// KEYS[1] = ledger, ARGV[1] = limit, ARGV[2] = window in ms, ARGV[3] = item.
const APPEND_WITHIN_LIMIT: &str = r"
local current = redis.call('LLEN', KEYS[1])
if current >= tonumber(ARGV[1]) then
    return 0
end
redis.call('LPUSH', KEYS[1], ARGV[3])
if tonumber(ARGV[2]) > 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 1
";

/// KEYS[1] = key, ARGV[1] = expected value.
const DELETE_IF_EQUALS: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    append_script: Script,
    delete_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl RedisStore {
    /// Wraps an existing connection pool.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            append_script: Script::new(APPEND_WITHIN_LIMIT),
            delete_script: Script::new(DELETE_IF_EQUALS),
        }
    }

    /// Creates a pool from configuration and verifies the server answers.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Config` if the pool cannot be built and
    /// `CacheError::BackendUnavailable` if the server cannot be reached.
    pub async fn connect(config: &CacheConfig) -> CacheResult<Self> {
        let url = config.redis_url()?;
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut redis_config = deadpool_redis::Config::from_url(url);
        if let Some(ref mut pool_config) = redis_config.pool {
            pool_config.max_size = config.pool_size;
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
        } else {
            let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
            pool_config.timeouts.wait = Some(timeout);
            pool_config.timeouts.create = Some(timeout);
            pool_config.timeouts.recycle = Some(timeout);
            redis_config.pool = Some(pool_config);
        }

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::Config(format!("failed to create Redis pool: {e}")))?;

        let store = Self::new(pool);
        store.ping().await?;
        tracing::info!(address = %config.redacted_address(), "Connected to Redis");
        Ok(store)
    }

    /// Round-trips a `PING` to the server.
    pub async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn("ping", "").await?;
        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_err("ping", "", e))?;
        Ok(())
    }

    async fn conn(&self, operation: &'static str, key: &str) -> CacheResult<Connection> {
        self.pool.get().await.map_err(|e| {
            tracing::warn!(key = %key, operation, error = %e, "Failed to get Redis connection");
            metrics::record_backend_error(BACKEND, operation);
            CacheError::BackendUnavailable {
                operation,
                key: key.to_string(),
                message: e.to_string(),
            }
        })
    }
}

fn map_err(operation: &'static str, key: &str, err: RedisError) -> CacheError {
    metrics::record_backend_error(BACKEND, operation);
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        tracing::warn!(key = %key, operation, error = %err, "Redis connection error");
        CacheError::BackendUnavailable {
            operation,
            key: key.to_string(),
            message: err.to_string(),
        }
    } else if err.code() == Some("WRONGTYPE") {
        CacheError::wrong_type(operation, key)
    } else {
        tracing::warn!(key = %key, operation, error = %err, "Redis command error");
        CacheError::Backend {
            operation,
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> CacheType {
        CacheType::Redis
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn("set", key).await?;
        match effective_ttl(ttl) {
            Some(ttl) => conn
                .pset_ex::<_, _, ()>(key, value.as_slice(), ttl_millis(ttl))
                .await
                .map_err(|e| map_err("set", key, e))?,
            None => conn
                .set::<_, _, ()>(key, value.as_slice())
                .await
                .map_err(|e| map_err("set", key, e))?,
        }
        tracing::debug!(key = %key, ttl = ?ttl, "cache set (redis)");
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let mut conn = self.conn("get", key).await?;
        match conn
            .get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| map_err("get", key, e))?
        {
            Some(data) => {
                metrics::record_cache_hit(BACKEND);
                Ok(data)
            }
            None => {
                tracing::debug!(key = %key, "cache miss (redis)");
                metrics::record_cache_miss(BACKEND);
                Err(CacheError::miss(key))
            }
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut conn = self.conn("set_if_absent", key).await?;
        match effective_ttl(ttl) {
            Some(ttl) => {
                let reply: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value.as_slice())
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_err("set_if_absent", key, e))?;
                Ok(reply.is_some())
            }
            None => conn
                .set_nx::<_, _, bool>(key, value.as_slice())
                .await
                .map_err(|e| map_err("set_if_absent", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn("delete", key).await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| map_err("delete", key, e))
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let mut conn = self.conn("delete_if_equals", key).await?;
        let removed: i64 = self
            .delete_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_err("delete_if_equals", key, e))?;
        Ok(removed == 1)
    }

    async fn add_to_set(&self, key: &str, members: &[&str]) -> CacheResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn("add_to_set", key).await?;
        conn.sadd::<_, _, ()>(key, members)
            .await
            .map_err(|e| map_err("add_to_set", key, e))
    }

    async fn is_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        let mut conn = self.conn("is_member", key).await?;
        conn.sismember::<_, _, bool>(key, member)
            .await
            .map_err(|e| map_err("is_member", key, e))
    }

    async fn append_within_limit(
        &self,
        key: &str,
        item: &str,
        limit: usize,
        window: Duration,
    ) -> CacheResult<bool> {
        let window_ms = effective_ttl(Some(window)).map_or(0, ttl_millis);
        let mut conn = self.conn("append_within_limit", key).await?;
        let admitted: i64 = self
            .append_script
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .arg(item)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_err("append_within_limit", key, e))?;
        Ok(admitted == 1)
    }

    async fn list_len(&self, key: &str) -> CacheResult<usize> {
        let mut conn = self.conn("list_len", key).await?;
        conn.llen::<_, usize>(key)
            .await
            .map_err(|e| map_err("list_len", key, e))
    }

    fn supports_ordered_sets(&self) -> bool {
        true
    }

    async fn incr_score(&self, key: &str, member: &str, delta: f64) -> CacheResult<f64> {
        let mut conn = self.conn("incr_score", key).await?;
        conn.zincr::<_, _, _, f64>(key, member, delta)
            .await
            .map_err(|e| map_err("incr_score", key, e))
    }

    async fn top_scores(&self, key: &str, n: usize) -> CacheResult<Vec<(String, f64)>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(n - 1).unwrap_or(isize::MAX);
        let mut conn = self.conn("top_scores", key).await?;
        let mut rows: Vec<(String, f64)> = conn
            .zrevrange_withscores(key, 0, stop)
            .await
            .map_err(|e| map_err("top_scores", key, e))?;

        // Redis orders equal scores reverse-lexicographically; refetch every
        // member tied at the cut-off so ties rank ascending instead.
        if rows.len() == n {
            if let Some(&(_, cutoff)) = rows.last() {
                rows = conn
                    .zrevrangebyscore_withscores(key, "+inf", cutoff)
                    .await
                    .map_err(|e| map_err("top_scores", key, e))?;
            }
        }

        rank_scores(&mut rows);
        rows.truncate(n);
        Ok(rows)
    }

    fn supports_sketches(&self) -> bool {
        true
    }

    async fn sketch_add(&self, key: &str, members: &[&str]) -> CacheResult<bool> {
        if members.is_empty() {
            return Ok(false);
        }
        let mut conn = self.conn("sketch_add", key).await?;
        conn.pfadd::<_, _, bool>(key, members)
            .await
            .map_err(|e| map_err("sketch_add", key, e))
    }

    async fn sketch_count(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.conn("sketch_count", key).await?;
        conn.pfcount::<_, u64>(key)
            .await
            .map_err(|e| map_err("sketch_count", key, e))
    }
}
