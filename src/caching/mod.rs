//! # Caching System Module
//!
//! Redis-backed caching for the SkillSwap API with graceful degradation.
//!
//! ## Architecture
//! The caching system follows a layered approach:
//! 1. **Backends** (`stores`): the raw key-value protocol, Redis or in-process
//! 2. **Adapter** (`store`): fault-tolerant wrapper that never fails; an
//!    unreachable store reads as a miss and writes as a no-op
//! 3. **Cache service** (`service`): typed cache regions with namespaced keys
//!    and fixed TTL tiers, cache-aside `remember`, bulk invalidation
//! 4. **Rate limiter** (`rate_limit`): fixed-window counters on the store
//! 5. **HTTP middleware** (`middleware`): response caching, invalidation on
//!    mutation, cache-control helpers
//!
//! ## Usage Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use skillswap_cache::caching::{CacheService, CacheTtl, KeyValueStore};
//!
//! let store = Arc::new(KeyValueStore::in_memory());
//! let cache = CacheService::new(store);
//!
//! cache.cache_user("u1", &profile).await;
//! let profile: Option<Profile> = cache.get_user("u1").await;
//!
//! let stats = cache
//!     .remember("analytics:dashboard", CacheTtl::Long, || async { compute().await })
//!     .await?;
//! ```

pub mod keys;
pub mod middleware;
pub mod rate_limit;
pub mod service;
pub mod store;
pub mod stores;

pub use keys::{search_hash, CachePrefix, CacheTtl};
pub use middleware::{CachedResponse, InvalidationState, ResponseCacheState};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use service::{CacheService, WarmupData, WarmupReport};
pub use store::{KeyValueStore, StoreStats};
pub use stores::{KvBackend, MemoryBackend, RedisBackend};

/// Store operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Store-level error types. Produced by backends, absorbed by the adapter.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}

impl CacheError {
    /// Create a store error with a custom message
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Whether this error means the link to the store is gone.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            Self::Timeout | Self::Unavailable => true,
            Self::Store { .. } | Self::Serialization(_) => false,
        }
    }
}

impl From<CacheError> for crate::core::error::ServiceError {
    fn from(err: CacheError) -> Self {
        crate::core::error::ServiceError::cache(err.to_string())
    }
}
