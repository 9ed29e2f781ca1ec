//! In-process store backed by a single mutex-guarded map.
//!
//! Every operation, reads included, takes the same lock. The contract offers
//! no per-key locking, so one coarse lock is what keeps `set_if_absent` and
//! `append_within_limit` indivisible. The lock is never held across an await.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{CacheError, CacheResult};
use crate::hll::HyperLogLog;
use crate::metrics;
use crate::traits::{KeyValueStore, rank_scores};
use crate::types::{CacheType, effective_ttl};

const BACKEND: &str = "in_memory";

#[derive(Debug)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
    List(VecDeque<String>),
    Sorted(HashMap<String, f64>),
    Sketch(HyperLogLog),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            expires_at: effective_ttl(ttl).map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Returns the live entry for `key`, evicting it first if it has expired.
fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if map.get(key).is_some_and(|entry| entry.is_expired(now)) {
        map.remove(key);
    }
    map.get_mut(key)
}

/// Returns the live entry for `key`, creating an empty one without expiry.
fn live_or_insert<'a>(
    map: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
    empty: impl FnOnce() -> Value,
) -> &'a mut Entry {
    if map.get(key).is_some_and(|entry| entry.is_expired(now)) {
        map.remove(key);
    }
    map.entry(key.to_string())
        .or_insert_with(|| Entry::new(empty(), None, now))
}

/// In-memory key-value store.
///
/// One instance lives for the whole process and is shared by every caller.
/// Expired entries are dropped lazily on access; [`MemoryStore::purge_expired`]
/// and [`MemoryStore::spawn_sweeper`] reclaim entries nobody touches again.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        metrics::set_cache_entries(BACKEND, entries.len());
        removed
    }

    /// Spawns a background task purging expired entries every `interval`.
    ///
    /// The task holds only a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    tracing::debug!("in-memory store dropped, sweeper exiting");
                    break;
                };
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "purged expired cache entries");
                }
            }
        })
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> CacheType {
        CacheType::InMemory
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<()> {
        let now = Instant::now();
        self.entries
            .lock()
            .insert(key.to_string(), Entry::new(Value::Bytes(value), ttl, now));
        tracing::debug!(key = %key, ttl = ?ttl, "cache set (memory)");
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Bytes(data),
                ..
            }) => {
                metrics::record_cache_hit(BACKEND);
                Ok(data.clone())
            }
            Some(_) => Err(CacheError::wrong_type("get", key)),
            None => {
                tracing::debug!(key = %key, "cache miss (memory)");
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
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(Value::Bytes(value), ttl, now));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> CacheResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let matches = match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Bytes(data),
                ..
            }) => data.as_slice() == expected,
            Some(_) => return Err(CacheError::wrong_type("delete_if_equals", key)),
            None => false,
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn add_to_set(&self, key: &str, members: &[&str]) -> CacheResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = live_or_insert(&mut entries, key, now, || Value::Set(HashSet::new()));
        match &mut entry.value {
            Value::Set(set) => {
                set.extend(members.iter().map(|member| member.to_string()));
                Ok(())
            }
            _ => Err(CacheError::wrong_type("add_to_set", key)),
        }
    }

    async fn is_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(CacheError::wrong_type("is_member", key)),
            None => Ok(false),
        }
    }

    async fn append_within_limit(
        &self,
        key: &str,
        item: &str,
        limit: usize,
        window: Duration,
    ) -> CacheResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let current = match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.len(),
            Some(_) => return Err(CacheError::wrong_type("append_within_limit", key)),
            None => 0,
        };
        if current >= limit {
            return Ok(false);
        }

        let entry = live_or_insert(&mut entries, key, now, || Value::List(VecDeque::new()));
        if let Value::List(list) = &mut entry.value {
            list.push_front(item.to_string());
        }
        entry.expires_at = effective_ttl(Some(window)).map(|window| now + window);
        Ok(true)
    }

    async fn list_len(&self, key: &str) -> CacheResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(CacheError::wrong_type("list_len", key)),
            None => Ok(0),
        }
    }

    fn supports_ordered_sets(&self) -> bool {
        true
    }

    async fn incr_score(&self, key: &str, member: &str, delta: f64) -> CacheResult<f64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = live_or_insert(&mut entries, key, now, || Value::Sorted(HashMap::new()));
        match &mut entry.value {
            Value::Sorted(scores) => {
                let score = scores.entry(member.to_string()).or_insert(0.0);
                *score += delta;
                Ok(*score)
            }
            _ => Err(CacheError::wrong_type("incr_score", key)),
        }
    }

    async fn top_scores(&self, key: &str, n: usize) -> CacheResult<Vec<(String, f64)>> {
        let now = Instant::now();
        let mut rows: Vec<(String, f64)> = {
            let mut entries = self.entries.lock();
            match live(&mut entries, key, now) {
                Some(Entry {
                    value: Value::Sorted(scores),
                    ..
                }) => scores
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect(),
                Some(_) => return Err(CacheError::wrong_type("top_scores", key)),
                None => Vec::new(),
            }
        };
        rank_scores(&mut rows);
        rows.truncate(n);
        Ok(rows)
    }

    fn supports_sketches(&self) -> bool {
        true
    }

    async fn sketch_add(&self, key: &str, members: &[&str]) -> CacheResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = live_or_insert(&mut entries, key, now, || Value::Sketch(HyperLogLog::new()));
        match &mut entry.value {
            Value::Sketch(sketch) => {
                let mut changed = false;
                for member in members {
                    changed |= sketch.insert(member);
                }
                Ok(changed)
            }
            _ => Err(CacheError::wrong_type("sketch_add", key)),
        }
    }

    async fn sketch_count(&self, key: &str) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Sketch(sketch),
                ..
            }) => Ok(sketch.count()),
            Some(_) => Err(CacheError::wrong_type("sketch_count", key)),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_key_is_miss() {
        let store = MemoryStore::new();
        let err = store.get("never-set").await.unwrap_err();
        assert!(err.is_miss());
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("k", b"value".to_vec(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"value".to_vec());

        store.set("k", b"replaced".to_vec(), Some(Duration::ZERO)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"replaced".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("short", b"v".to_vec(), Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert!(store.get("short").await.is_ok());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(store.get("short").await.unwrap_err().is_miss());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_respects_expired_slot() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("slot", b"a".to_vec(), Some(Duration::from_secs(1)))
            .await
            .unwrap());
        assert!(!store.set_if_absent("slot", b"b".to_vec(), None).await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.set_if_absent("slot", b"c".to_vec(), None).await.unwrap());
        assert_eq!(store.get("slot").await.unwrap(), b"c".to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_set_if_absent_single_winner_under_contention() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..100 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("race", format!("racer-{i}").into_bytes(), None)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("gone", b"v".to_vec(), None).await.unwrap();
        store.delete("gone").await.unwrap();
        store.delete("gone").await.unwrap();
        store.delete("gone").await.unwrap();
        assert!(store.get("gone").await.unwrap_err().is_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_if_equals_only_removes_matching_value() {
        let store = MemoryStore::new();
        store.set("slot", b"ticket-a".to_vec(), None).await.unwrap();

        assert!(!store.delete_if_equals("slot", b"ticket-b").await.unwrap());
        assert_eq!(store.get("slot").await.unwrap(), b"ticket-a".to_vec());

        assert!(store.delete_if_equals("slot", b"ticket-a").await.unwrap());
        assert!(store.get("slot").await.unwrap_err().is_miss());
        assert!(!store.delete_if_equals("slot", b"ticket-a").await.unwrap());

        store
            .set("short", b"ticket-c".to_vec(), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.delete_if_equals("short", b"ticket-c").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryStore::new();
        assert!(!store.is_member("admins", "alice").await.unwrap());

        store.add_to_set("admins", &["alice", "bob"]).await.unwrap();
        store.add_to_set("admins", &["alice"]).await.unwrap();
        assert!(store.is_member("admins", "alice").await.unwrap());
        assert!(store.is_member("admins", "bob").await.unwrap());
        assert!(!store.is_member("admins", "carol").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_kind_is_reported() {
        let store = MemoryStore::new();
        store.set("scalar", b"1".to_vec(), None).await.unwrap();

        let err = store.add_to_set("scalar", &["x"]).await.unwrap_err();
        assert!(matches!(err, CacheError::WrongType { operation: "add_to_set", .. }));

        store.add_to_set("members", &["x"]).await.unwrap();
        let err = store.get("members").await.unwrap_err();
        assert!(matches!(err, CacheError::WrongType { operation: "get", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_within_limit_fixed_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        assert!(store.append_within_limit("ledger", "1", 2, window).await.unwrap());
        assert!(store.append_within_limit("ledger", "2", 2, window).await.unwrap());
        assert!(!store.append_within_limit("ledger", "3", 2, window).await.unwrap());
        assert_eq!(store.list_len("ledger").await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.list_len("ledger").await.unwrap(), 0);
        assert!(store.append_within_limit("ledger", "4", 2, window).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_append_does_not_extend_window() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(10);

        assert!(store.append_within_limit("ledger", "1", 1, window).await.unwrap());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!store.append_within_limit("ledger", "2", 1, window).await.unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.append_within_limit("ledger", "3", 1, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_limit_always_denies() {
        let store = MemoryStore::new();
        assert!(!store
            .append_within_limit("ledger", "1", 0, Duration::from_secs(1))
            .await
            .unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_leaderboard_ordering() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store.incr_score("top_users", "alice", 1.0).await.unwrap();
        }
        for _ in 0..2 {
            store.incr_score("top_users", "bob", 1.0).await.unwrap();
        }
        store.incr_score("top_users", "carol", 2.0).await.unwrap();

        let top = store.top_scores("top_users", 2).await.unwrap();
        assert_eq!(
            top,
            vec![("alice".to_string(), 5.0), ("bob".to_string(), 2.0)]
        );
        assert!(store.top_scores("empty", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sketch_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.sketch_count("ping_users").await.unwrap(), 0);
        for _ in 0..1000 {
            store.sketch_add("ping_users", &["alice"]).await.unwrap();
        }
        assert_eq!(store.sketch_count("ping_users").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.set("a", b"1".to_vec(), Some(Duration::from_secs(1))).await.unwrap();
        store.set("b", b"2".to_vec(), Some(Duration::from_secs(1))).await.unwrap();
        store.set("c", b"3".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_in_background() {
        let store = Arc::new(MemoryStore::new());
        store.set("a", b"1".to_vec(), Some(Duration::from_secs(1))).await.unwrap();
        let handle = store.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.entries.lock().len(), 0);

        drop(store);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }
}
