//! # Cache Service
//!
//! Domain cache regions layered on [`KeyValueStore`]. Each region pairs a key
//! prefix with a TTL tier:
//!
//! | Region              | Key                     | TTL          |
//! |---------------------|-------------------------|--------------|
//! | user profile        | `user:{id}`             | Medium       |
//! | category list       | `category:all`          | VeryLong     |
//! | skills per category | `skill:category:{id}`   | Long         |
//! | search results      | `search:{hash}`         | Short        |
//! | session             | `session:{id}`          | UserSession  |
//! | analytics           | `analytics:{name}`      | Long         |
//! | notification count  | `notif_count:{userId}`  | Short        |
//!
//! Nothing here fails because the store is down; reads miss and writes
//! report `false`.

use super::keys::{search_hash, CachePrefix, CacheTtl};
use super::rate_limit::{RateLimitDecision, RateLimiter};
use super::store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const ALL_CATEGORIES: &str = "all";

/// Payload for pre-populating the read-heavy regions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupData {
    #[serde(default)]
    pub categories: Option<Value>,
    #[serde(default)]
    pub popular_skills_by_category: Option<HashMap<String, Value>>,
}

/// What a warmup run wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    pub categories_cached: bool,
    pub skill_categories_cached: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CacheService {
    store: Arc<KeyValueStore>,
    limiter: RateLimiter,
}

impl CacheService {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        let limiter = RateLimiter::new(store.clone());
        Self { store, limiter }
    }

    /// Underlying adapter
    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Return the cached value at `key`, or run `compute`, store its result
    /// for `ttl` and return it. The write finishes before this returns.
    /// Errors from `compute` are returned as-is and nothing is cached.
    pub async fn remember<T, F, Fut, E>(&self, key: &str, ttl: CacheTtl, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.store.get_json::<T>(key).await {
            debug!(key, "Cache hit");
            return Ok(hit);
        }

        debug!(key, "Cache miss, computing");
        let value = compute().await?;
        self.store.set_json(key, &value, Some(ttl.duration())).await;
        Ok(value)
    }

    // User profiles

    pub async fn cache_user<T: Serialize + ?Sized>(&self, user_id: &str, user: &T) -> bool {
        self.put(CachePrefix::User.key(user_id), user, CacheTtl::Medium).await
    }

    pub async fn get_user<T: DeserializeOwned>(&self, user_id: &str) -> Option<T> {
        self.store.get_json(&CachePrefix::User.key(user_id)).await
    }

    pub async fn invalidate_user(&self, user_id: &str) -> bool {
        self.store.del(&CachePrefix::User.key(user_id)).await
    }

    // Categories

    pub async fn cache_categories<T: Serialize + ?Sized>(&self, categories: &T) -> bool {
        self.put(CachePrefix::Category.key(ALL_CATEGORIES), categories, CacheTtl::VeryLong)
            .await
    }

    pub async fn get_categories<T: DeserializeOwned>(&self) -> Option<T> {
        self.store
            .get_json(&CachePrefix::Category.key(ALL_CATEGORIES))
            .await
    }

    pub async fn invalidate_categories(&self) -> bool {
        self.store
            .del(&CachePrefix::Category.key(ALL_CATEGORIES))
            .await
    }

    // Skills per category

    fn skills_key(category_id: &str) -> String {
        CachePrefix::Skill.key(&format!("category:{}", category_id))
    }

    pub async fn cache_skills_by_category<T: Serialize + ?Sized>(
        &self,
        category_id: &str,
        skills: &T,
    ) -> bool {
        self.put(Self::skills_key(category_id), skills, CacheTtl::Long)
            .await
    }

    pub async fn get_skills_by_category<T: DeserializeOwned>(&self, category_id: &str) -> Option<T> {
        self.store.get_json(&Self::skills_key(category_id)).await
    }

    pub async fn invalidate_skills_by_category(&self, category_id: &str) -> bool {
        self.store.del(&Self::skills_key(category_id)).await
    }

    // Search results

    /// Key for a query and its filters
    pub fn search_key(query: &str, filters: &Value) -> String {
        CachePrefix::Search.key(&search_hash(query, filters))
    }

    pub async fn cache_search_results<T: Serialize + ?Sized>(
        &self,
        query: &str,
        filters: &Value,
        results: &T,
    ) -> bool {
        self.put(Self::search_key(query, filters), results, CacheTtl::Short)
            .await
    }

    pub async fn get_search_results<T: DeserializeOwned>(
        &self,
        query: &str,
        filters: &Value,
    ) -> Option<T> {
        self.store.get_json(&Self::search_key(query, filters)).await
    }

    /// Drop every cached search
    pub async fn invalidate_search_results(&self) -> u64 {
        self.invalidate_pattern(&CachePrefix::Search.pattern()).await
    }

    // Sessions

    pub async fn cache_session<T: Serialize + ?Sized>(&self, session_id: &str, session: &T) -> bool {
        self.put(CachePrefix::Session.key(session_id), session, CacheTtl::UserSession)
            .await
    }

    pub async fn get_session<T: DeserializeOwned>(&self, session_id: &str) -> Option<T> {
        self.store
            .get_json(&CachePrefix::Session.key(session_id))
            .await
    }

    pub async fn invalidate_session(&self, session_id: &str) -> bool {
        self.store.del(&CachePrefix::Session.key(session_id)).await
    }

    // Analytics

    pub async fn cache_analytics<T: Serialize + ?Sized>(&self, name: &str, data: &T) -> bool {
        self.put(CachePrefix::Analytics.key(name), data, CacheTtl::Long)
            .await
    }

    pub async fn get_analytics<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.store.get_json(&CachePrefix::Analytics.key(name)).await
    }

    pub async fn invalidate_analytics(&self, name: &str) -> bool {
        self.store.del(&CachePrefix::Analytics.key(name)).await
    }

    // Notification counts

    pub async fn cache_notification_count(&self, user_id: &str, count: u64) -> bool {
        self.put(CachePrefix::NotificationCount.key(user_id), &count, CacheTtl::Short)
            .await
    }

    pub async fn get_notification_count(&self, user_id: &str) -> Option<u64> {
        self.store
            .get_json(&CachePrefix::NotificationCount.key(user_id))
            .await
    }

    pub async fn invalidate_notification_count(&self, user_id: &str) -> bool {
        self.store
            .del(&CachePrefix::NotificationCount.key(user_id))
            .await
    }

    // Rate limiting and bulk invalidation

    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> RateLimitDecision {
        self.limiter.check(identifier, limit, window).await
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Delete every key matching a glob, returning how many were removed
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let removed = self.store.del_pattern(pattern).await;
        info!(pattern, removed, "Invalidated cache pattern");
        removed
    }

    /// Drop the user's profile, notification count and session entries.
    pub async fn invalidate_user_caches(&self, user_id: &str) {
        let (profile, notifications, session) = tokio::join!(
            self.invalidate_user(user_id),
            self.invalidate_notification_count(user_id),
            self.invalidate_session(user_id),
        );
        debug!(user_id, profile, notifications, session, "Invalidated user caches");
    }

    /// Pre-populate the category and per-category skill regions.
    pub async fn warmup(&self, data: WarmupData) -> WarmupReport {
        let mut report = WarmupReport::default();

        if let Some(categories) = &data.categories {
            report.categories_cached = self.cache_categories(categories).await;
            if !report.categories_cached {
                report.failed += 1;
            }
        }

        if let Some(skills) = &data.popular_skills_by_category {
            for (category_id, skills) in skills {
                if self.cache_skills_by_category(category_id, skills).await {
                    report.skill_categories_cached += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        info!(
            categories = report.categories_cached,
            skill_categories = report.skill_categories_cached,
            failed = report.failed,
            "Cache warmup finished"
        );
        report
    }

    async fn put<T: Serialize + ?Sized>(&self, key: String, value: &T, ttl: CacheTtl) -> bool {
        self.store.set_json(&key, value, Some(ttl.duration())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::MemoryBackend;
    use serde_json::json;

    fn service() -> (CacheService, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(KeyValueStore::new(backend.clone()));
        (CacheService::new(store), backend)
    }

    #[tokio::test]
    async fn test_regions_use_expected_keys_and_ttls() {
        let (service, _) = service();
        let store = service.store().clone();

        service.cache_user("u1", &json!({"userId": "u1"})).await;
        service.cache_categories(&json!(["music"])).await;
        service.cache_skills_by_category("c1", &json!(["guitar"])).await;
        service.cache_session("s1", &json!({"token": "t"})).await;
        service.cache_analytics("daily", &json!({"swaps": 3})).await;
        service.cache_notification_count("u1", 7).await;

        assert_eq!(store.ttl("user:u1").await, 1800);
        assert_eq!(store.ttl("category:all").await, 86_400);
        assert_eq!(store.ttl("skill:category:c1").await, 3600);
        assert_eq!(store.ttl("session:s1").await, 604_800);
        assert_eq!(store.ttl("analytics:daily").await, 3600);
        assert_eq!(store.ttl("notif_count:u1").await, 300);
    }

    #[tokio::test]
    async fn test_search_results_share_slot_for_equal_filters() {
        let (service, _) = service();
        let filters: Value = serde_json::from_str(r#"{"level":"beginner","category":"music"}"#).unwrap();
        let reordered: Value =
            serde_json::from_str(r#"{"category":"music","level":"beginner"}"#).unwrap();

        service
            .cache_search_results("guitar", &filters, &json!([{"id": 1}]))
            .await;

        let hit: Option<Value> = service.get_search_results("guitar", &reordered).await;
        assert_eq!(hit, Some(json!([{"id": 1}])));

        let miss: Option<Value> = service.get_search_results("piano", &filters).await;
        assert!(miss.is_none());

        assert_eq!(service.invalidate_search_results().await, 1);
    }

    #[tokio::test]
    async fn test_remember_computes_once() {
        let (service, _) = service();
        let calls = std::sync::atomic::AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Value, std::convert::Infallible> = service
                .remember("analytics:top", CacheTtl::Long, || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(json!({"top": ["rust"]}))
                })
                .await;
            assert_eq!(value.unwrap(), json!({"top": ["rust"]}));
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remember_propagates_errors_without_caching() {
        let (service, _) = service();

        let result: Result<Value, String> = service
            .remember("analytics:broken", CacheTtl::Short, || async {
                Err("database offline".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "database offline");
        assert!(!service.store().exists("analytics:broken").await);
    }

    #[tokio::test]
    async fn test_remember_computes_every_time_when_store_down() {
        let (service, backend) = service();
        backend.set_available(false);
        let calls = std::sync::atomic::AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Result<u64, std::convert::Infallible> = service
                .remember("analytics:n", CacheTtl::Short, || async {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(value.unwrap(), 42);
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_user_caches_fans_out() {
        let (service, _) = service();
        service.cache_user("u1", &json!({"userId": "u1"})).await;
        service.cache_notification_count("u1", 3).await;
        service.cache_session("u1", &json!({"active": true})).await;
        service.cache_user("u2", &json!({"userId": "u2"})).await;

        service.invalidate_user_caches("u1").await;

        assert!(service.get_user::<Value>("u1").await.is_none());
        assert!(service.get_notification_count("u1").await.is_none());
        assert!(service.get_session::<Value>("u1").await.is_none());
        assert!(service.get_user::<Value>("u2").await.is_some());
    }

    #[tokio::test]
    async fn test_warmup_populates_regions() {
        let (service, _) = service();
        let mut skills = HashMap::new();
        skills.insert("c1".to_string(), json!(["guitar"]));
        skills.insert("c2".to_string(), json!(["painting"]));

        let report = service
            .warmup(WarmupData {
                categories: Some(json!([{"id": "c1"}, {"id": "c2"}])),
                popular_skills_by_category: Some(skills),
            })
            .await;

        assert!(report.categories_cached);
        assert_eq!(report.skill_categories_cached, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(
            service.get_skills_by_category::<Value>("c2").await,
            Some(json!(["painting"]))
        );
    }

    #[tokio::test]
    async fn test_warmup_counts_failures_when_store_down() {
        let (service, backend) = service();
        backend.set_available(false);

        let report = service
            .warmup(WarmupData {
                categories: Some(json!([])),
                popular_skills_by_category: None,
            })
            .await;

        assert!(!report.categories_cached);
        assert_eq!(report.failed, 1);
    }
}
