//! End-to-end `/ping` flow on the in-memory backend with a paused clock.

use std::sync::Arc;
use std::time::Duration;

use storefront_cache::MemoryStore;
use storefront_session::{
    AppConfig, CallerIdentity, PingOutcome, PingService, PingSettings, SessionCoordinator,
    apply_logging_level, build_ping_service, init_observability, keys,
};

fn service(rate_limit: usize) -> PingService {
    service_with_coordinator(rate_limit).0
}

fn service_with_coordinator(rate_limit: usize) -> (PingService, SessionCoordinator) {
    let coordinator = SessionCoordinator::new(Arc::new(MemoryStore::new()));
    let service = PingService::new(
        coordinator.clone(),
        PingSettings {
            rate_limit,
            window: Duration::from_secs(60),
            hold: Duration::from_secs(1),
        },
    );
    (service, coordinator)
}

fn alice() -> CallerIdentity {
    CallerIdentity::new("token-a", "alice")
}

#[test]
fn test_default_settings() {
    let settings = PingSettings::default();
    assert_eq!(settings.rate_limit, 2);
    assert_eq!(settings.window, Duration::from_secs(60));
    assert_eq!(settings.hold, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_pong_counts_calls() {
    let service = service(5);

    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { calls: 1 });
    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { calls: 2 });

    assert_eq!(service.top().await.unwrap(), ["alice"]);
    assert_eq!(service.count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_third_call_in_window_is_rate_limited() {
    let (service, coordinator) = service_with_coordinator(2);

    assert!(matches!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { .. }));
    assert!(matches!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { .. }));
    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::RateLimited);

    // A rejected call leaves no trace in the counters.
    let calls: u64 = coordinator.get(&keys::ping_counter("alice")).await.unwrap();
    assert_eq!(calls, 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { calls: 3 });
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_call_same_token_is_busy() {
    let service = service(5);

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.ping(&alice()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Busy);
    assert_eq!(first.await.unwrap().unwrap(), PingOutcome::Pong { calls: 1 });

    // The slot is free again once the first call finished.
    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { calls: 3 });
}

#[tokio::test(start_paused = true)]
async fn test_lock_is_per_token() {
    let service = service(5);
    let laptop = CallerIdentity::new("token-laptop", "alice");
    let phone = CallerIdentity::new("token-phone", "alice");

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.ping(&laptop).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(matches!(service.ping(&phone).await.unwrap(), PingOutcome::Pong { .. }));
    assert!(matches!(first.await.unwrap().unwrap(), PingOutcome::Pong { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_call_frees_lock() {
    let service = service(5);

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.ping(&alice()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { calls: 2 });
}

#[tokio::test(start_paused = true)]
async fn test_leaderboard_and_unique_callers() {
    let service = service(10);
    let bob = CallerIdentity::new("token-b", "bob");
    let carol = CallerIdentity::new("token-c", "carol");

    for _ in 0..3 {
        service.ping(&bob).await.unwrap();
    }
    service.ping(&alice()).await.unwrap();
    service.ping(&carol).await.unwrap();

    assert_eq!(service.top().await.unwrap(), ["bob", "alice", "carol"]);
    assert_eq!(service.count().await.unwrap(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_ping_key_layout() {
    let (service, coordinator) = service_with_coordinator(5);
    service.ping(&alice()).await.unwrap();

    let store = coordinator.store();
    assert_eq!(store.list_len(&keys::rate_limit("/ping", "alice")).await.unwrap(), 1);
    let calls: u64 = coordinator.get(&keys::ping_counter("alice")).await.unwrap();
    assert_eq!(calls, 1);
    assert!(store.get(&keys::ping_lock("token-a")).await.unwrap_err().is_miss());
    assert_eq!(coordinator.top_ten(keys::TOP_USERS_KEY).await.unwrap(), ["alice"]);
}

#[tokio::test(start_paused = true)]
async fn test_build_from_config() {
    let mut config = AppConfig::default();
    config.ping.hold_ms = 50;
    config.logging.level = "debug".into();
    init_observability(&config);
    assert!(apply_logging_level(&config.logging.level));

    let service = build_ping_service(&config).await.unwrap();
    assert_eq!(service.settings().hold, Duration::from_millis(50));
    assert_eq!(service.ping(&alice()).await.unwrap(), PingOutcome::Pong { calls: 1 });
}
