//! # Cache Keys and TTL Tiers
//!
//! Every key the cache service writes is `prefix:identifier`, with the prefix
//! drawn from [`CachePrefix`]. Expiries come only from [`CacheTtl`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Width of the search hash used as a key suffix
pub const SEARCH_HASH_LEN: usize = 32;

/// Key namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CachePrefix {
    User,
    Category,
    Skill,
    Search,
    Session,
    Analytics,
    NotificationCount,
    RateLimit,
    Performance,
    HttpResponse,
}

impl CachePrefix {
    pub const ALL: [CachePrefix; 10] = [
        CachePrefix::User,
        CachePrefix::Category,
        CachePrefix::Skill,
        CachePrefix::Search,
        CachePrefix::Session,
        CachePrefix::Analytics,
        CachePrefix::NotificationCount,
        CachePrefix::RateLimit,
        CachePrefix::Performance,
        CachePrefix::HttpResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CachePrefix::User => "user",
            CachePrefix::Category => "category",
            CachePrefix::Skill => "skill",
            CachePrefix::Search => "search",
            CachePrefix::Session => "session",
            CachePrefix::Analytics => "analytics",
            CachePrefix::NotificationCount => "notif_count",
            CachePrefix::RateLimit => "ratelimit",
            CachePrefix::Performance => "perf",
            CachePrefix::HttpResponse => "http",
        }
    }

    /// `prefix:identifier`
    pub fn key(&self, identifier: &str) -> String {
        format!("{}:{}", self.as_str(), identifier)
    }

    /// Glob matching every key in this namespace
    pub fn pattern(&self) -> String {
        format!("{}:*", self.as_str())
    }

    /// Prefix of a namespaced key, if it carries a recognized one.
    pub fn of_key(key: &str) -> Option<CachePrefix> {
        let (prefix, rest) = key.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|p| p.as_str() == prefix)
    }
}

impl fmt::Display for CachePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTtl {
    /// 5 minutes
    Short,
    /// 30 minutes
    Medium,
    /// 1 hour
    Long,
    /// 1 day
    VeryLong,
    /// 7 days
    UserSession,
}

impl CacheTtl {
    pub const fn as_secs(&self) -> u64 {
        match self {
            CacheTtl::Short => 300,
            CacheTtl::Medium => 1800,
            CacheTtl::Long => 3600,
            CacheTtl::VeryLong => 86_400,
            CacheTtl::UserSession => 604_800,
        }
    }

    pub const fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// Stable key suffix for a search query and its filters.
///
/// `{query, filters}` is serialized with object keys sorted at every level, so
/// filter objects that differ only in key order hash the same. The JSON is
/// SHA-256 hashed and base64url encoded before truncating, so long queries
/// sharing a prefix do not collide.
pub fn search_hash(query: &str, filters: &serde_json::Value) -> String {
    let canonical = canonicalize(&serde_json::json!({
        "filters": filters,
        "query": query,
    }));
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    let mut encoded = URL_SAFE_NO_PAD.encode(digest);
    encoded.truncate(SEARCH_HASH_LEN);
    encoded
}

/// Rebuild a JSON value with object keys inserted in sorted order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_tiers() {
        assert_eq!(CacheTtl::Short.as_secs(), 300);
        assert_eq!(CacheTtl::Medium.as_secs(), 1800);
        assert_eq!(CacheTtl::Long.as_secs(), 3600);
        assert_eq!(CacheTtl::VeryLong.as_secs(), 86_400);
        assert_eq!(CacheTtl::UserSession.duration(), Duration::from_secs(604_800));
    }

    #[test]
    fn test_prefix_keys() {
        assert_eq!(CachePrefix::User.key("u1"), "user:u1");
        assert_eq!(CachePrefix::NotificationCount.key("u1"), "notif_count:u1");
        assert_eq!(CachePrefix::RateLimit.key("ip:1.2.3.4"), "ratelimit:ip:1.2.3.4");
        assert_eq!(CachePrefix::Session.pattern(), "session:*");
    }

    #[test]
    fn test_prefix_of_key() {
        assert_eq!(CachePrefix::of_key("user:42"), Some(CachePrefix::User));
        assert_eq!(
            CachePrefix::of_key("ratelimit:ip:1.2.3.4"),
            Some(CachePrefix::RateLimit)
        );
        assert_eq!(CachePrefix::of_key("unknown:42"), None);
        assert_eq!(CachePrefix::of_key("user:"), None);
        assert_eq!(CachePrefix::of_key("user"), None);
    }

    #[test]
    fn test_prefixes_are_distinct() {
        let mut names: Vec<_> = CachePrefix::ALL.iter().map(|p| p.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CachePrefix::ALL.len());
    }

    #[test]
    fn test_search_hash_is_stable_and_fixed_width() {
        let filters = json!({"category": "music", "level": "beginner"});
        let a = search_hash("guitar", &filters);
        let b = search_hash("guitar", &filters);
        assert_eq!(a, b);
        assert_eq!(a.len(), SEARCH_HASH_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_search_hash_ignores_filter_key_order() {
        let one: serde_json::Value =
            serde_json::from_str(r#"{"level":"beginner","category":"music"}"#).unwrap();
        let two: serde_json::Value =
            serde_json::from_str(r#"{"category":"music","level":"beginner"}"#).unwrap();
        assert_eq!(search_hash("guitar", &one), search_hash("guitar", &two));
    }

    #[test]
    fn test_search_hash_distinguishes_inputs() {
        let filters = json!({"category": "music"});
        assert_ne!(search_hash("guitar", &filters), search_hash("piano", &filters));
        assert_ne!(
            search_hash("guitar", &filters),
            search_hash("guitar", &json!({"category": "art"}))
        );

        let long = "a".repeat(200);
        assert_ne!(
            search_hash(&format!("{}x", long), &filters),
            search_hash(&format!("{}y", long), &filters)
        );
    }
}
