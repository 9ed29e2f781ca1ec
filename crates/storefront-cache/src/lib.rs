//! Backend-agnostic key-value store for session coordination.
//!
//! ## Backends
//!
//! - **In-memory**: one mutex-guarded map per process
//! - **Redis**: shared across instances, atomicity delegated to the server
//!
//! ## Capabilities
//!
//! Scalars, sets and rate-limit ledgers are mandatory. Ordered sets
//! (leaderboards) and cardinality sketches are optional capabilities a
//! backend advertises through [`KeyValueStore::supports_ordered_sets`] and
//! [`KeyValueStore::supports_sketches`]. Both shipped backends support them.

pub mod config;
pub mod error;
pub mod factory;
pub mod hll;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod traits;
pub mod types;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use factory::create_store;
pub use hll::HyperLogLog;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{DynStore, KeyValueStore};
pub use types::CacheType;
