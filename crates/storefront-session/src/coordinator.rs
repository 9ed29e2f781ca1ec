//! Session coordination policy built on a [`storefront_cache::KeyValueStore`].
//!
//! ## Primitives
//!
//! - **Sessions**: JSON session records under `session_cache_key:<id>`, no expiry
//! - **Facade**: generic JSON get/set/delete
//! - **Lock**: single-holder slot via `set_if_absent` holding an owner ticket,
//!   released by a delete that checks the ticket
//! - **Rate limiter**: fixed-window ledger, see [`SessionCoordinator::check_rate_limit`]
//! - **Leaderboard**: per-identity call counts, top-N query
//! - **Unique callers**: approximate distinct count via a cardinality sketch
//!
//! ## Cancellation
//!
//! Every store call is bounded by the coordinator's operation timeout, the
//! caller's deadline (if any) and the caller's cancellation token. Whichever
//! fires first drops the in-flight backend call and returns
//! `CacheError::DeadlineExceeded` or `CacheError::Canceled`. Nothing retries.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;
use storefront_cache::{CacheError, CacheResult, CacheType, DynStore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::keys;
use crate::lock::LockGuard;
use crate::metrics;
use crate::session::Session;

/// Default upper bound for a single store call.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of entries returned by [`SessionCoordinator::top_ten`].
pub const TOP_N: usize = 10;

/// Policy layer over a shared store.
///
/// Holds no state besides the store handle, so clones are cheap and every
/// clone sees the same entries. Derive a request-scoped instance with
/// [`for_request`](Self::for_request) and [`with_deadline`](Self::with_deadline).
#[derive(Clone)]
pub struct SessionCoordinator {
    store: DynStore,
    op_timeout: Duration,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("backend", &self.store.backend())
            .field("op_timeout", &self.op_timeout)
            .field("deadline", &self.deadline)
            .field("canceled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl SessionCoordinator {
    pub fn new(store: DynStore) -> Self {
        Self::with_op_timeout(store, DEFAULT_OP_TIMEOUT)
    }

    pub fn with_op_timeout(store: DynStore, op_timeout: Duration) -> Self {
        Self {
            store,
            op_timeout,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// A copy whose calls fail with `Canceled` once `cancel` fires.
    pub fn for_request(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// A copy whose calls fail with `DeadlineExceeded` past `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn backend(&self) -> CacheType {
        self.store.backend()
    }

    /// The instant the next store call must finish by.
    ///
    /// Fails up front when the request is already canceled or past its
    /// deadline, so no store work is started.
    fn call_deadline(&self, operation: &'static str, key: &str) -> CacheResult<Instant> {
        if self.cancel.is_cancelled() {
            return Err(CacheError::Canceled {
                operation,
                key: key.to_string(),
            });
        }
        let mut deadline = Instant::now() + self.op_timeout;
        if let Some(caller_deadline) = self.deadline {
            deadline = deadline.min(caller_deadline);
        }
        if Instant::now() >= deadline {
            return Err(CacheError::DeadlineExceeded {
                operation,
                key: key.to_string(),
            });
        }
        Ok(deadline)
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        let deadline = self.call_deadline(operation, key)?;
        self.run_until(operation, key, deadline, call).await
    }

    async fn run_until<T>(
        &self,
        operation: &'static str,
        key: &str,
        deadline: Instant,
        call: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(key = %key, operation, "cache operation canceled");
                Err(CacheError::Canceled { operation, key: key.to_string() })
            }
            result = tokio::time::timeout_at(deadline, call) => {
                result.unwrap_or_else(|_| {
                    tracing::warn!(key = %key, operation, "cache operation exceeded deadline");
                    Err(CacheError::DeadlineExceeded { operation, key: key.to_string() })
                })
            }
        }
    }

    // ==================== Sessions ====================

    /// Stores a session record under `session_cache_key:<id>` with no expiry.
    pub async fn set_session(&self, id: &str, session: &Session) -> CacheResult<()> {
        let key = keys::session(id);
        self.set(&key, session).await.inspect_err(|e| {
            tracing::info!(id = %id, error = %e, "failed to store session");
        })
    }

    /// Looks up a session record.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Miss` when no session exists and
    /// `CacheError::Serialization` when the stored entry is not a session.
    pub async fn get_session(&self, id: &str) -> CacheResult<Session> {
        let key = keys::session(id);
        self.get(&key).await.inspect_err(|e| {
            if !e.is_miss() {
                tracing::error!(id = %id, error = %e, "failed to load session");
            }
        })
    }

    // ==================== Generic facade ====================

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let data = self.guarded("get", key, self.store.get(key)).await?;
        serde_json::from_slice(&data).map_err(|e| CacheError::serialization("get", key, e))
    }

    /// Stores `value` with no expiry.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set_with_ttl(key, value, None).await
    }

    pub async fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let data = serde_json::to_vec(value).map_err(|e| CacheError::serialization("set", key, e))?;
        self.guarded("set", key, self.store.set(key, data, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.guarded("delete", key, self.store.delete(key)).await
    }

    // ==================== Lock ====================

    /// Tries to take the slot named `key`.
    ///
    /// Returns `false` when another caller holds it; callers must reject the
    /// operation rather than retry. A successful caller owns the slot until
    /// it deletes `key`. Prefer [`lock`](Self::lock), which ties the release
    /// to a guard.
    pub async fn try_lock(&self, key: &str) -> CacheResult<bool> {
        Ok(self.try_lock_with_ttl(key, None).await?.is_some())
    }

    /// Writes a fresh owner ticket into the slot, returning it on success.
    ///
    /// The write runs as its own task so its outcome is always observed. If
    /// the caller gives up first (cancellation or deadline) and the write
    /// turns out to have taken the slot, the slot is handed back as soon as
    /// the write completes, but only while it still holds this ticket.
    async fn try_lock_with_ttl(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<Option<String>> {
        let deadline = self.call_deadline("try_lock", key)?;
        let ticket = Uuid::new_v4().to_string();

        let mut write: JoinHandle<CacheResult<bool>> = {
            let store = self.store.clone();
            let key = key.to_string();
            let value = ticket.clone().into_bytes();
            tokio::spawn(async move { store.set_if_absent(&key, value, ttl).await })
        };
        let outcome = self
            .run_until("try_lock", key, deadline, async {
                (&mut write).await.unwrap_or_else(|e| {
                    Err(CacheError::Backend {
                        operation: "try_lock",
                        key: key.to_string(),
                        message: e.to_string(),
                    })
                })
            })
            .await;

        let held = match outcome {
            Ok(held) => held,
            Err(e) => {
                if e.is_canceled() {
                    self.release_abandoned(key, ticket, write);
                }
                return Err(e);
            }
        };
        metrics::record_lock_attempt(held);
        tracing::debug!(key = %key, held, "lock attempt");
        Ok(held.then_some(ticket))
    }

    /// Frees a slot taken by an attempt whose caller already gave up.
    fn release_abandoned(&self, key: &str, ticket: String, write: JoinHandle<CacheResult<bool>>) {
        let store = self.store.clone();
        let key = key.to_string();
        let release_timeout = self.op_timeout;
        tokio::spawn(async move {
            let Ok(Ok(true)) = write.await else {
                return;
            };
            let release = store.delete_if_equals(&key, ticket.as_bytes());
            match tokio::time::timeout(release_timeout, release).await {
                Ok(Ok(removed)) => {
                    tracing::info!(key = %key, removed, "released lock taken by an abandoned attempt")
                }
                Ok(Err(e)) => {
                    tracing::warn!(key = %key, error = %e, "failed to release abandoned lock")
                }
                Err(_) => tracing::warn!(key = %key, "timed out releasing abandoned lock"),
            }
        });
    }

    /// Takes the slot named `key`, returning a guard that releases it.
    ///
    /// The slot has no expiry: a process that dies while holding it leaves
    /// it held until someone deletes the key.
    pub async fn lock(&self, key: &str) -> CacheResult<Option<LockGuard>> {
        self.lock_with_ttl(key, None).await
    }

    /// Like [`lock`](Self::lock) but the slot frees itself after `ttl`.
    pub async fn lock_with_ttl(
        &self,
        key: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<Option<LockGuard>> {
        let Some(ticket) = self.try_lock_with_ttl(key, ttl).await? else {
            return Ok(None);
        };
        Ok(Some(LockGuard::new(
            self.store.clone(),
            key.to_string(),
            ticket,
            self.op_timeout,
        )))
    }

    // ==================== Rate limiting ====================

    /// Admits at most `limit` calls per `window` under `key`.
    ///
    /// Fixed window approximated with a growing ledger: when the ledger already
    /// holds `limit` timestamps the call is denied without mutation, otherwise
    /// the current timestamp is appended and the ledger expiry reset to
    /// `window`. The window only resets when the ledger expires, so bursts
    /// straddling an expiry can exceed the nominal limit.
    ///
    /// The check, append and expiry refresh run as one atomic store operation.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: usize,
        window: Duration,
    ) -> CacheResult<bool> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
            .to_string();
        let allowed = self
            .guarded(
                "check_rate_limit",
                key,
                self.store.append_within_limit(key, &now, limit, window),
            )
            .await?;
        metrics::record_rate_limit_decision(allowed);
        tracing::debug!(key = %key, limit, window = ?window, allowed, "rate limit check");
        Ok(allowed)
    }

    /// Rate limit keyed by `rate_limit:<route>:<identity>`.
    pub async fn check_route_rate_limit(
        &self,
        route: &str,
        identity: &str,
        limit: usize,
        window: Duration,
    ) -> CacheResult<bool> {
        self.check_rate_limit(&keys::rate_limit(route, identity), limit, window)
            .await
    }

    // ==================== Leaderboard ====================

    fn require_ordered_sets(&self, operation: &'static str) -> CacheResult<()> {
        if self.store.supports_ordered_sets() {
            Ok(())
        } else {
            tracing::info!(backend = %self.backend(), operation, "backend lacks ordered sets");
            Err(CacheError::unsupported(self.backend(), operation))
        }
    }

    /// Adds one call to `identity`'s score.
    pub async fn increase_top_calls(&self, key: &str, identity: &str) -> CacheResult<()> {
        self.require_ordered_sets("increase_top_calls")?;
        self.guarded(
            "increase_top_calls",
            key,
            self.store.incr_score(key, identity, 1.0),
        )
        .await?;
        Ok(())
    }

    /// The `n` identities with the most calls, most first.
    ///
    /// Equal scores are ordered lexicographically by identity.
    pub async fn top_callers(&self, key: &str, n: usize) -> CacheResult<Vec<String>> {
        self.require_ordered_sets("top_callers")?;
        let rows = self
            .guarded("top_callers", key, self.store.top_scores(key, n))
            .await?;
        Ok(rows.into_iter().map(|(identity, _)| identity).collect())
    }

    pub async fn top_ten(&self, key: &str) -> CacheResult<Vec<String>> {
        self.top_callers(key, TOP_N).await
    }

    // ==================== Unique callers ====================

    fn require_sketches(&self, operation: &'static str) -> CacheResult<()> {
        if self.store.supports_sketches() {
            Ok(())
        } else {
            tracing::info!(backend = %self.backend(), operation, "backend lacks sketches");
            Err(CacheError::unsupported(self.backend(), operation))
        }
    }

    pub async fn add_observation(&self, key: &str, identity: &str) -> CacheResult<()> {
        self.require_sketches("add_observation")?;
        self.guarded(
            "add_observation",
            key,
            self.store.sketch_add(key, &[identity]),
        )
        .await?;
        Ok(())
    }

    /// Approximate number of distinct identities observed. Not exact.
    pub async fn estimate_count(&self, key: &str) -> CacheResult<u64> {
        self.require_sketches("estimate_count")?;
        self.guarded("estimate_count", key, self.store.sketch_count(key))
            .await
    }
}
