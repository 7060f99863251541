//! # Fixed-Window Rate Limiter
//!
//! One counter per identifier at `ratelimit:{identifier}`. The first hit in a
//! window creates the counter and starts its expiry in the same atomic step;
//! later hits only increment until the key expires.
//!
//! When the store is unreachable the increment reports 0, so every request is
//! allowed with the full allowance remaining.

use super::keys::CachePrefix;
use super::store::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one rate-limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never below 1
    pub fn retry_after_secs(&self) -> u64 {
        let secs = (self.reset_at - Utc::now()).num_seconds();
        secs.max(1) as u64
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<KeyValueStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self { store }
    }

    /// Count one request for `identifier` against `limit` per `window`.
    pub async fn check(&self, identifier: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let key = CachePrefix::RateLimit.key(identifier);
        let count = self.store.incr_window(&key, window).await;
        let now = Utc::now();

        if count <= 0 {
            debug!(identifier, "Rate-limit store unavailable; allowing request");
            return RateLimitDecision {
                allowed: true,
                remaining: limit,
                reset_at: reset_after(now, window),
                limit,
            };
        }

        let ttl = self.store.ttl(&key).await;
        let reset_at = if ttl > 0 {
            reset_after(now, Duration::from_secs(ttl as u64))
        } else {
            reset_after(now, window)
        };

        let count = u64::try_from(count).unwrap_or(u64::MAX);
        let allowed = count <= u64::from(limit);
        let remaining = u64::from(limit).saturating_sub(count) as u32;

        if !allowed {
            warn!(identifier, count, limit, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            remaining,
            reset_at,
            limit,
        }
    }

    /// Drop the counter for `identifier`, starting a fresh window on the next hit
    pub async fn reset(&self, identifier: &str) -> bool {
        self.store.del(&CachePrefix::RateLimit.key(identifier)).await
    }
}

fn reset_after(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::MemoryBackend;

    fn limiter() -> (RateLimiter, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(KeyValueStore::new(backend.clone()));
        (RateLimiter::new(store), backend)
    }

    #[tokio::test]
    async fn test_limit_of_two() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(10);

        let first = limiter.check("ip:1.2.3.4", 2, window).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        let second = limiter.check("ip:1.2.3.4", 2, window).await;
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check("ip:1.2.3.4", 2, window).await;
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);

        assert!(limiter.check("user:a", 1, window).await.allowed);
        assert!(!limiter.check("user:a", 1, window).await.allowed);
        assert!(limiter.check("user:b", 1, window).await.allowed);
    }

    #[tokio::test]
    async fn test_reset_at_tracks_window() {
        let (limiter, _) = limiter();
        let decision = limiter.check("ip:9.9.9.9", 5, Duration::from_secs(60)).await;
        let until_reset = (decision.reset_at - Utc::now()).num_seconds();
        assert!((58..=60).contains(&until_reset));
        assert!(decision.retry_after_secs() >= 58);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_unreachable() {
        let (limiter, backend) = limiter();
        backend.set_available(false);

        for _ in 0..5 {
            let decision = limiter.check("ip:1.2.3.4", 2, Duration::from_secs(10)).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_starts_fresh_count() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(10);

        assert!(limiter.check("ip:1.1.1.1", 1, window).await.allowed);
        assert!(!limiter.check("ip:1.1.1.1", 1, window).await.allowed);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(limiter.check("ip:1.1.1.1", 1, window).await.allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_counter() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);
        limiter.check("user:x", 1, window).await;
        assert!(!limiter.check("user:x", 1, window).await.allowed);

        assert!(limiter.reset("user:x").await);
        assert!(limiter.check("user:x", 1, window).await.allowed);
    }
}
