//! The `/ping` flow: every coordination primitive exercised by one call.
//!
//! ```text
//! rate limit ─► call counter ─► leaderboard ─► unique callers ─► lock ─► pong
//!     │                                                           │
//!     └─► RateLimited                                             └─► Busy
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::PingConfig;
use crate::coordinator::SessionCoordinator;
use crate::keys;
use crate::session::CallerIdentity;
use storefront_cache::CacheResult;

/// Route identifier used in the rate-limit key.
pub const PING_ROUTE: &str = "/ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSettings {
    /// Calls admitted per window and caller.
    pub rate_limit: usize,
    pub window: Duration,
    /// How long the critical section is held.
    pub hold: Duration,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self::from(&PingConfig::default())
    }
}

impl From<&PingConfig> for PingSettings {
    fn from(config: &PingConfig) -> Self {
        Self {
            rate_limit: config.rate_limit,
            window: Duration::from_secs(config.window_secs),
            hold: Duration::from_millis(config.hold_ms),
        }
    }
}

/// Result of a `/ping` call. Rejections are outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// The call ran; `calls` is the caller's running total.
    Pong { calls: u64 },
    /// The caller exceeded its rate limit.
    RateLimited,
    /// Another call from the same caller holds the lock.
    Busy,
}

#[derive(Debug, Clone)]
pub struct PingService {
    coordinator: SessionCoordinator,
    settings: PingSettings,
}

impl PingService {
    pub fn new(coordinator: SessionCoordinator, settings: PingSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    /// A copy whose store calls are tied to one request's cancellation.
    pub fn for_request(&self, cancel: CancellationToken) -> Self {
        Self {
            coordinator: self.coordinator.for_request(cancel),
            settings: self.settings,
        }
    }

    pub fn settings(&self) -> &PingSettings {
        &self.settings
    }

    pub async fn ping(&self, caller: &CallerIdentity) -> CacheResult<PingOutcome> {
        let coordinator = &self.coordinator;

        let allowed = coordinator
            .check_route_rate_limit(
                PING_ROUTE,
                &caller.username,
                self.settings.rate_limit,
                self.settings.window,
            )
            .await?;
        if !allowed {
            tracing::info!(username = %caller.username, "ping rate limited");
            return Ok(PingOutcome::RateLimited);
        }

        let counter_key = keys::ping_counter(&caller.username);
        let calls = match coordinator.get::<u64>(&counter_key).await {
            Ok(calls) => calls,
            Err(e) if e.is_miss() => 0,
            Err(e) => return Err(e),
        } + 1;
        coordinator.set(&counter_key, &calls).await?;

        coordinator
            .increase_top_calls(keys::TOP_USERS_KEY, &caller.username)
            .await?;
        coordinator
            .add_observation(keys::PING_USERS_KEY, &caller.username)
            .await?;

        let lock_key = keys::ping_lock(&caller.id);
        let Some(guard) = coordinator.lock(&lock_key).await? else {
            tracing::info!(id = %caller.id, "ping rejected, lock held");
            return Ok(PingOutcome::Busy);
        };

        tokio::time::sleep(self.settings.hold).await;
        guard.release().await?;

        Ok(PingOutcome::Pong { calls })
    }

    /// The ten callers with the most pings.
    pub async fn top(&self) -> CacheResult<Vec<String>> {
        self.coordinator.top_ten(keys::TOP_USERS_KEY).await
    }

    /// Approximate number of distinct callers.
    pub async fn count(&self) -> CacheResult<u64> {
        self.coordinator.estimate_count(keys::PING_USERS_KEY).await
    }
}
