use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use storefront_cache::CacheType;
use storefront_session::ConfigError;
use storefront_session::config::loader::load_config;

// Environment variables are process-wide; loader tests run one at a time.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("storefront.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_missing_file_uses_defaults() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let cfg = load_config(path.to_str()).unwrap();
    assert_eq!(cfg.cache.cache_type().unwrap(), CacheType::InMemory);
    assert_eq!(cfg.coordinator.op_timeout_ms, 2000);
    assert_eq!(cfg.ping.rate_limit, 2);
    assert_eq!(cfg.logging.level, "info");
}

#[test]
fn test_file_selects_redis() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[cache]
backend = "redis"
host = "cache.internal"
port = 6380
pool_size = 4

[ping]
rate_limit = 5
hold_ms = 250
"#,
    );

    let cfg = load_config(Some(&path)).unwrap();
    assert_eq!(cfg.cache.cache_type().unwrap(), CacheType::Redis);
    assert_eq!(cfg.cache.host, "cache.internal");
    assert_eq!(cfg.cache.port, 6380);
    assert_eq!(cfg.cache.pool_size, 4);
    assert_eq!(cfg.ping.rate_limit, 5);
    assert_eq!(cfg.ping.hold_ms, 250);
    assert_eq!(cfg.ping.window_secs, 60);
}

#[test]
fn test_env_overrides_file() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[cache]
backend = "in_memory"

[logging]
level = "warn"
"#,
    );

    unsafe {
        std::env::set_var("STOREFRONT__CACHE__BACKEND", "redis");
        std::env::set_var("STOREFRONT__CACHE__PORT", "6390");
        std::env::set_var("STOREFRONT__LOGGING__LEVEL", "debug");
    }
    let loaded = load_config(Some(&path));
    unsafe {
        std::env::remove_var("STOREFRONT__CACHE__BACKEND");
        std::env::remove_var("STOREFRONT__CACHE__PORT");
        std::env::remove_var("STOREFRONT__LOGGING__LEVEL");
    }

    let cfg = loaded.unwrap();
    assert_eq!(cfg.cache.cache_type().unwrap(), CacheType::Redis);
    assert_eq!(cfg.cache.port, 6390);
    assert_eq!(cfg.logging.level, "debug");
}

#[test]
fn test_unknown_backend_is_rejected() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[cache]
backend = "memcached"
"#,
    );

    let err = load_config(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("memcached"));
}

#[test]
fn test_wrong_value_type_is_rejected() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[cache]
port = "not-a-port"
"#,
    );

    let err = load_config(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Deserialize(_)));
}
