//! The key-value store contract every backend implements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CacheError, CacheResult};
use crate::types::CacheType;

/// Minimal key-value store consumed by the session coordination layer.
///
/// Keys are opaque strings and scalar values are opaque byte payloads.
/// A TTL of `None` or zero means the entry never expires.
///
/// `set_if_absent` and `append_within_limit` must be indivisible with respect
/// to every other operation on the same backend instance. Nothing else carries
/// a cross-caller ordering guarantee.
///
/// Ordered-set and sketch operations are optional capabilities. Their default
/// bodies return [`CacheError::BackendTypeMismatch`]; a backend that overrides
/// them must also report the capability through `supports_ordered_sets` or
/// `supports_sketches`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// The backend kind of this implementation.
    fn backend(&self) -> CacheType;

    // ==================== Scalars ====================

    /// Stores `value`, replacing any prior value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Miss` when the key is absent or expired.
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>>;

    /// Stores `value` only if no live entry exists for `key`.
    ///
    /// Returns `true` if this call performed the write.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Removes an entry. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Removes `key` only while it still holds exactly `expected`.
    ///
    /// Returns `true` if this call removed the entry. The default body is a
    /// non-atomic get-then-delete; backends override it with a single
    /// indivisible step.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        match self.get(key).await {
            Ok(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) if e.is_miss() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ==================== Sets ====================

    /// Adds one or more members to the unordered set under `key`.
    async fn add_to_set(&self, key: &str, members: &[&str]) -> CacheResult<()>;

    /// Checks whether `member` belongs to the set under `key`.
    async fn is_member(&self, key: &str, member: &str) -> CacheResult<bool>;

    // ==================== Ledgers ====================

    /// Pushes `item` onto the list under `key` unless it already holds
    /// `limit` or more items, then (re)sets the key expiry to `window`.
    ///
    /// Returns `false` without touching the list or its expiry when full.
    async fn append_within_limit(
        &self,
        key: &str,
        item: &str,
        limit: usize,
        window: Duration,
    ) -> CacheResult<bool>;

    /// Number of items in the list under `key`, zero when absent.
    async fn list_len(&self, key: &str) -> CacheResult<usize>;

    // ==================== Ordered sets ====================

    fn supports_ordered_sets(&self) -> bool {
        false
    }

    /// Adds `delta` to the score of `member`, returning the new score.
    async fn incr_score(&self, _key: &str, _member: &str, _delta: f64) -> CacheResult<f64> {
        Err(CacheError::unsupported(self.backend(), "incr_score"))
    }

    /// The `n` highest-scoring members, score descending.
    ///
    /// Members with equal scores are ordered lexicographically ascending.
    async fn top_scores(&self, _key: &str, _n: usize) -> CacheResult<Vec<(String, f64)>> {
        Err(CacheError::unsupported(self.backend(), "top_scores"))
    }

    // ==================== Cardinality sketches ====================

    fn supports_sketches(&self) -> bool {
        false
    }

    /// Inserts members into the sketch under `key`.
    ///
    /// Returns `true` if the estimate may have changed.
    async fn sketch_add(&self, _key: &str, _members: &[&str]) -> CacheResult<bool> {
        Err(CacheError::unsupported(self.backend(), "sketch_add"))
    }

    /// Approximate number of distinct members inserted under `key`.
    async fn sketch_count(&self, _key: &str) -> CacheResult<u64> {
        Err(CacheError::unsupported(self.backend(), "sketch_count"))
    }
}

/// Type alias for a shareable store instance.
pub type DynStore = Arc<dyn KeyValueStore>;

/// Orders leaderboard rows by score descending, then member ascending.
pub(crate) fn rank_scores(rows: &mut [(String, f64)]) {
    rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}
