//! # Key-Value Store Adapter
//!
//! Fault-tolerant front for a [`KvBackend`]. No method here returns an error:
//! when the backend is unreachable or a command fails, reads return their miss
//! value (`None`, `false`, `0`, `-1`) and writes return `false`. Failures are
//! logged with the operation name and key.

use super::keys::CachePrefix;
use super::stores::{KvBackend, MemoryBackend, RedisBackend};
use super::CacheError;
use crate::core::config::RedisConfig;
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Snapshot of the store's own statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub connected: bool,
    pub db_size: u64,
    pub memory_human: String,
    pub hits: u64,
    pub misses: u64,
}

impl StoreStats {
    /// Shape reported when the store cannot be reached or its report is unreadable
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            db_size: 0,
            memory_human: "0B".to_string(),
            hits: 0,
            misses: 0,
        }
    }

    /// Fraction of lookups served from the store
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Fault-tolerant key-value store
#[derive(Clone)]
pub struct KeyValueStore {
    backend: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("backend", &self.backend.name())
            .field("ready", &self.backend.is_connected())
            .finish()
    }
}

impl KeyValueStore {
    /// Wrap an arbitrary backend
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh in-process backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Store for the configured backend: Redis when enabled and the URL
    /// parses, the in-process backend otherwise. Does not connect.
    pub fn from_config(config: &RedisConfig) -> Self {
        if !config.enabled {
            info!("Redis disabled, using in-memory store");
            return Self::in_memory();
        }

        match RedisBackend::new(config.clone()) {
            Ok(backend) => Self::new(Arc::new(backend)),
            Err(e) => {
                error!(url = %config.url, error = %e, "Invalid Redis configuration, using in-memory store");
                Self::in_memory()
            }
        }
    }

    /// Name of the active backend
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Connect the backend. Failure is logged and leaves the store degraded.
    pub async fn connect(&self) -> bool {
        match self.backend.connect().await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    backend = self.backend.name(),
                    error = %e,
                    "Cache store unreachable; serving without cache"
                );
                false
            }
        }
    }

    /// Release the backend connection
    pub async fn disconnect(&self) {
        if let Err(e) = self.backend.disconnect().await {
            warn!(backend = self.backend.name(), error = %e, "Error while disconnecting cache store");
        }
    }

    /// Whether operations currently reach the store
    pub fn is_ready(&self) -> bool {
        self.backend.is_connected()
    }

    fn log_failure(operation: &'static str, key: &str, err: &CacheError) {
        let namespace = key_namespace(key);
        counter!("cache_store_errors_total", "operation" => operation, "namespace" => namespace)
            .increment(1);
        error!(operation, namespace, key, error = %err, "Cache store operation failed");
    }

    /// GET; `None` on miss or failure
    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.is_ready() {
            return None;
        }
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                Self::log_failure("get", key, &e);
                None
            }
        }
    }

    /// SET with optional expiry. A zero TTL is treated as no expiry.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        if !self.is_ready() {
            return false;
        }
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        match self.backend.set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                Self::log_failure("set", key, &e);
                false
            }
        }
    }

    /// JSON-encode and SET
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        match serde_json::to_string(value) {
            Ok(encoded) => self.set(key, &encoded, ttl).await,
            Err(e) => {
                Self::log_failure("set_json", key, &CacheError::from(e));
                false
            }
        }
    }

    /// GET and JSON-decode; undecodable values count as misses
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                Self::log_failure("get_json", key, &CacheError::from(e));
                None
            }
        }
    }

    /// DEL; true when the key existed
    pub async fn del(&self, key: &str) -> bool {
        if !self.is_ready() {
            return false;
        }
        match self.backend.del(&[key.to_string()]).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                Self::log_failure("del", key, &e);
                false
            }
        }
    }

    /// Delete every key matching a glob, returning how many were removed
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        if !self.is_ready() {
            return 0;
        }

        let keys = match self.backend.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                Self::log_failure("del_pattern", pattern, &e);
                return 0;
            }
        };

        if keys.is_empty() {
            return 0;
        }

        match self.backend.del(&keys).await {
            Ok(removed) => {
                debug!(pattern, removed, "Deleted keys by pattern");
                removed
            }
            Err(e) => {
                Self::log_failure("del_pattern", pattern, &e);
                0
            }
        }
    }

    /// EXISTS
    pub async fn exists(&self, key: &str) -> bool {
        if !self.is_ready() {
            return false;
        }
        match self.backend.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                Self::log_failure("exists", key, &e);
                false
            }
        }
    }

    /// EXPIRE
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        if !self.is_ready() {
            return false;
        }
        match self.backend.expire(key, ttl).await {
            Ok(applied) => applied,
            Err(e) => {
                Self::log_failure("expire", key, &e);
                false
            }
        }
    }

    /// INCR; 0 when the store is unavailable
    pub async fn incr(&self, key: &str) -> i64 {
        if !self.is_ready() {
            return 0;
        }
        match self.backend.incr(key).await {
            Ok(value) => value,
            Err(e) => {
                Self::log_failure("incr", key, &e);
                0
            }
        }
    }

    /// DECR; 0 when the store is unavailable
    pub async fn decr(&self, key: &str) -> i64 {
        if !self.is_ready() {
            return 0;
        }
        match self.backend.decr(key).await {
            Ok(value) => value,
            Err(e) => {
                Self::log_failure("decr", key, &e);
                0
            }
        }
    }

    /// Atomic INCR that starts a `window` expiry on the first hit; 0 when the
    /// store is unavailable
    pub async fn incr_window(&self, key: &str, window: Duration) -> i64 {
        if !self.is_ready() {
            return 0;
        }
        match self.backend.incr_with_expiry(key, window).await {
            Ok(value) => value,
            Err(e) => {
                Self::log_failure("incr_window", key, &e);
                0
            }
        }
    }

    /// Seconds until expiry; -1 without expiry, for missing keys, or when the
    /// store is unavailable
    pub async fn ttl(&self, key: &str) -> i64 {
        if !self.is_ready() {
            return -1;
        }
        match self.backend.ttl(key).await {
            Ok(secs) if secs >= 0 => secs,
            Ok(_) => -1,
            Err(e) => {
                Self::log_failure("ttl", key, &e);
                -1
            }
        }
    }

    /// FLUSHALL
    pub async fn flush_all(&self) -> bool {
        if !self.is_ready() {
            return false;
        }
        warn!(backend = self.backend.name(), "Flushing entire cache store");
        match self.backend.flush_all().await {
            Ok(()) => true,
            Err(e) => {
                Self::log_failure("flush_all", "*", &e);
                false
            }
        }
    }

    /// Store statistics parsed from the backend's INFO report
    pub async fn stats(&self) -> StoreStats {
        if !self.is_ready() {
            return StoreStats::disconnected();
        }

        let info = match self.backend.info().await {
            Ok(info) => info,
            Err(e) => {
                Self::log_failure("stats", "info", &e);
                return StoreStats::disconnected();
            }
        };

        let db_size = match self.backend.db_size().await {
            Ok(size) => size,
            Err(e) => {
                Self::log_failure("stats", "dbsize", &e);
                return StoreStats::disconnected();
            }
        };

        match parse_info(&info) {
            Some((memory_human, hits, misses)) => StoreStats {
                connected: true,
                db_size,
                memory_human,
                hits,
                misses,
            },
            None => {
                warn!("Could not parse cache store INFO report");
                StoreStats::disconnected()
            }
        }
    }
}

fn info_field<'a>(info: &'a str, name: &str) -> Option<&'a str> {
    info.lines().find_map(|line| {
        let (field, value) = line.split_once(':')?;
        (field.trim() == name).then(|| value.trim())
    })
}

/// Extract `(used_memory_human, keyspace_hits, keyspace_misses)`.
pub(crate) fn parse_info(info: &str) -> Option<(String, u64, u64)> {
    let memory = info_field(info, "used_memory_human")?.to_string();
    let hits = info_field(info, "keyspace_hits")?.parse().ok()?;
    let misses = info_field(info, "keyspace_misses")?.parse().ok()?;
    Some((memory, hits, misses))
}

/// Namespace label for a key or pattern, `other` outside the known prefixes
fn key_namespace(key: &str) -> &'static str {
    CachePrefix::of_key(key).map_or("other", |prefix| prefix.as_str())
}
