//! Tracing setup driven by [`LoggingConfig`], with a runtime-reloadable filter.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static LOG_RELOAD_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber filtered at `level`.
///
/// `RUST_LOG`, when set and valid, takes precedence over `level`. Only the
/// first call installs anything.
pub fn init_tracing_with_level(level: &str) {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        Err(_) => EnvFilter::new(level),
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    if LOG_RELOAD_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Installs tracing at `logging.level`, or re-applies the level if tracing
/// is already installed.
pub fn init_tracing_from_config(config: &LoggingConfig) {
    if !apply_logging_level(&config.level) {
        init_tracing_with_level(&config.level);
    }
    tracing::debug!(level = %config.level, "logging configured");
}

/// Swaps the active filter for `level`.
///
/// Returns `false` when tracing was not installed through this module.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = LOG_RELOAD_HANDLE.get() else {
        return false;
    };
    handle.modify(|filter| *filter = EnvFilter::new(level)).is_ok()
}
