//! Session and coordination primitives over a pluggable key-value store.
//!
//! ## Architecture
//!
//! ```text
//! HTTP layer → SessionCoordinator → KeyValueStore → (map | Redis)
//! ```
//!
//! Nothing below [`SessionCoordinator`] knows about HTTP, and nothing above
//! [`storefront_cache::KeyValueStore`] knows which backend is active. One store
//! instance is created per process by [`build_coordinator`] and injected.

pub mod config;
pub mod coordinator;
pub mod keys;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod ping;
pub mod session;

pub use config::{AppConfig, ConfigError, CoordinatorConfig, LoggingConfig, PingConfig};
pub use coordinator::SessionCoordinator;
pub use lock::LockGuard;
pub use observability::{
    apply_logging_level, init_tracing, init_tracing_from_config, init_tracing_with_level,
};
pub use ping::{PingOutcome, PingService, PingSettings};
pub use session::{CallerIdentity, Session};

use storefront_cache::{CacheResult, create_store};

/// Install process-wide logging and metrics from configuration.
///
/// Call once at startup, before [`build_coordinator`]. Calling it again
/// re-applies `logging.level` to the already installed subscriber.
pub fn init_observability(config: &AppConfig) {
    init_tracing_from_config(&config.logging);
    crate::metrics::init_metrics();
}

/// Create the process-scoped store and a coordinator over it.
///
/// Fails on unknown backends and unreachable Redis servers; there is no
/// fallback to the in-memory backend.
pub async fn build_coordinator(config: &AppConfig) -> CacheResult<SessionCoordinator> {
    let store = create_store(&config.cache).await?;
    tracing::info!(
        backend = %store.backend(),
        op_timeout_ms = config.coordinator.op_timeout_ms,
        "Session coordinator initialized"
    );
    Ok(SessionCoordinator::with_op_timeout(store, config.op_timeout()))
}

/// Create the `/ping` flow on top of a fresh coordinator.
pub async fn build_ping_service(config: &AppConfig) -> CacheResult<PingService> {
    let coordinator = build_coordinator(config).await?;
    Ok(PingService::new(coordinator, PingSettings::from(&config.ping)))
}
