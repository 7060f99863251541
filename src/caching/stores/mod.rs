//! # Cache Stores Module
//!
//! Raw key-value backends. Both speak the subset of the Redis protocol the
//! caching layer needs; neither hides failures. Degradation is the adapter's
//! job (see [`crate::caching::KeyValueStore`]).

pub mod memory;
pub mod redis_store;

pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

use super::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Key-value protocol consumed by the caching layer.
///
/// Values are strings; JSON encoding happens above this trait. TTLs are whole
/// seconds on the wire, so sub-second durations round up to one second.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short backend name used in logs and stats
    fn name(&self) -> &'static str;

    /// Whether the backend believes it can currently reach its store
    fn is_connected(&self) -> bool;

    /// Establish the link to the store
    async fn connect(&self) -> CacheResult<()>;

    /// Release the link to the store
    async fn disconnect(&self) -> CacheResult<()>;

    /// GET
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// SET, or SETEX when `ttl` is present
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// DEL over one or more keys, returning how many existed
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    /// Enumerate keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// EXISTS
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// EXPIRE, false when the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// INCR, missing keys start at 0
    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// DECR, missing keys start at 0
    async fn decr(&self, key: &str) -> CacheResult<i64>;

    /// INCR and, when the key was just created or carries no expiry, EXPIRE,
    /// as one atomic step.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> CacheResult<i64>;

    /// TTL in seconds; -1 without expiry, -2 when the key does not exist
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// FLUSHALL
    async fn flush_all(&self) -> CacheResult<()>;

    /// DBSIZE
    async fn db_size(&self) -> CacheResult<u64>;

    /// INFO-style report containing at least `used_memory_human`,
    /// `keyspace_hits` and `keyspace_misses` lines
    async fn info(&self) -> CacheResult<String>;
}

/// Whole seconds for a TTL, never zero.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
