//! Key naming conventions.
//!
//! These strings are shared with state already persisted by earlier
//! deployments and must not change.

/// Leaderboard of `/ping` callers.
pub const TOP_USERS_KEY: &str = "top_users";

/// Cardinality sketch of distinct `/ping` callers.
pub const PING_USERS_KEY: &str = "ping_users";

pub fn session(id: &str) -> String {
    format!("session_cache_key:{id}")
}

pub fn rate_limit(route: &str, identity: &str) -> String {
    format!("rate_limit:{route}:{identity}")
}

pub fn ping_lock(identity: &str) -> String {
    format!("ping_lock:{identity}")
}

pub fn ping_counter(identity: &str) -> String {
    format!("ping_counter:{identity}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(session("abc"), "session_cache_key:abc");
        assert_eq!(rate_limit("/ping", "alice"), "rate_limit:/ping:alice");
        assert_eq!(ping_lock("42"), "ping_lock:42");
        assert_eq!(ping_counter("alice"), "ping_counter:alice");
    }
}
