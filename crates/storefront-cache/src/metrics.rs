//! Cache metrics.
//!
//! Recorded through the `metrics` facade; they are no-ops until the embedding
//! application installs a recorder.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_BACKEND_ERRORS_TOTAL: &str = "cache_backend_errors_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
}

/// Record a cache hit.
pub fn record_cache_hit(backend: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "backend" => backend).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss(backend: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "backend" => backend).increment(1);
}

/// Record a failed backend call.
pub fn record_backend_error(backend: &'static str, operation: &'static str) {
    counter!(
        names::CACHE_BACKEND_ERRORS_TOTAL,
        "backend" => backend,
        "operation" => operation
    )
    .increment(1);
}

/// Set the number of live entries held by a local backend.
pub fn set_cache_entries(backend: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "backend" => backend).set(count as f64);
}
