//! # HTTP Cache Middleware
//!
//! Axum middleware for whole-response caching of read requests, pattern
//! invalidation after successful mutations, and cache-control header helpers.
//!
//! ```ignore
//! let cached = Router::new()
//!     .route("/api/skills", get(list_skills))
//!     .layer(from_fn_with_state(cache_state, response_cache));
//! let mutations = Router::new()
//!     .route("/api/skills", post(create_skill))
//!     .layer(from_fn_with_state(invalidation_state, invalidate_on_success));
//! ```

use super::keys::CachePrefix;
use super::store::KeyValueStore;
use crate::core::background::BackgroundTasks;
use crate::core::error::ServiceError;
use crate::core::types::request_user_id;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error};

/// Header reporting whether the response came from the cache
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const ANONYMOUS: &str = "anonymous";

/// Stored form of a cached response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub body: Value,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    /// Body annotated with `cached` and `cacheTime`. Non-object bodies are
    /// wrapped under `data`.
    pub fn annotated_body(&self) -> Value {
        let mut body = match &self.body {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
        };
        body.insert("cached".to_string(), Value::Bool(true));
        body.insert(
            "cacheTime".to_string(),
            Value::String(self.cached_at.to_rfc3339()),
        );
        Value::Object(body)
    }
}

/// State for [`response_cache`]
#[derive(Debug, Clone)]
pub struct ResponseCacheState {
    pub store: Arc<KeyValueStore>,
    pub tasks: BackgroundTasks,
    pub ttl: Duration,
    pub max_body_bytes: usize,
}

impl ResponseCacheState {
    pub fn new(store: Arc<KeyValueStore>, tasks: BackgroundTasks) -> Self {
        Self {
            store,
            tasks,
            ttl: Duration::from_secs(300),
            max_body_bytes: 1024 * 1024,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// `http:{METHOD}:{path}:{user}:{query}` where the query is the JSON object
/// of its parameters with keys sorted. A repeated parameter keeps every value,
/// in order, as an array.
pub fn response_cache_key(request: &Request) -> String {
    let user = request_user_id(request).unwrap_or_else(|| ANONYMOUS.to_string());
    let query = request
        .uri()
        .query()
        .map(query_json)
        .unwrap_or_else(|| "{}".to_string());

    CachePrefix::HttpResponse.key(&format!(
        "{}:{}:{}:{}",
        request.method(),
        normalize_path(request.uri().path()),
        user,
        query
    ))
}

fn query_json(query: &str) -> String {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()).into_owned() {
        params.entry(name).or_default().push(value);
    }

    let params: serde_json::Map<String, Value> = params
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                Value::String(values.remove(0))
            } else {
                Value::from(values)
            };
            (name, value)
        })
        .collect();
    Value::Object(params).to_string()
}

/// Escape glob metacharacters so `text` only matches itself.
pub(crate) fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false)
}

/// Serve cached JSON for GET requests and cache successful JSON responses.
pub async fn response_cache(
    State(state): State<ResponseCacheState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET || !state.store.is_ready() {
        return next.run(request).await;
    }

    let key = response_cache_key(&request);

    if let Some(cached) = state.store.get_json::<CachedResponse>(&key).await {
        debug!(key = %key, "Response cache hit");
        let mut response = (StatusCode::OK, Json(cached.annotated_body())).into_response();
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("HIT"));
        return response;
    }

    let response = next.run(request).await;
    if !response.status().is_success() || !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let fits = body
        .size_hint()
        .upper()
        .map_or(false, |len| len <= state.max_body_bytes as u64);
    if !fits {
        debug!(key = %key, "Response body too large to cache");
        return Response::from_parts(parts, body);
    }

    let bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(key = %key, error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(body) = serde_json::from_slice::<Value>(&bytes) {
        let store = state.store.clone();
        let ttl = state.ttl;
        let entry = CachedResponse {
            body,
            cached_at: Utc::now(),
        };
        state.tasks.spawn("response_cache_write", async move {
            if store.set_json(&key, &entry, Some(ttl)).await {
                Ok(())
            } else {
                Err(ServiceError::cache(format!("failed to cache response {}", key)))
            }
        });
    }

    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    Response::from_parts(parts, Body::from(bytes))
}

/// State for [`invalidate_on_success`]
#[derive(Debug, Clone)]
pub struct InvalidationState {
    pub store: Arc<KeyValueStore>,
    pub tasks: BackgroundTasks,
    pub patterns: Arc<[String]>,
}

impl InvalidationState {
    pub fn new<I, S>(store: Arc<KeyValueStore>, tasks: BackgroundTasks, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            tasks,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// After a 2xx response, delete every key containing any configured pattern
/// as a literal substring.
/// The deletion runs as a background task.
pub async fn invalidate_on_success(
    State(state): State<InvalidationState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    if response.status().is_success() && !state.patterns.is_empty() {
        let store = state.store.clone();
        let patterns = state.patterns.clone();
        state.tasks.spawn("cache_invalidation", async move {
            let deletions = patterns
                .iter()
                .map(|pattern| format!("*{}*", escape_glob(pattern)))
                .map(|glob| {
                    let store = store.clone();
                    async move { store.del_pattern(&glob).await }
                });
            let removed: u64 = join_all(deletions).await.into_iter().sum();
            debug!(removed, "Invalidated cache after mutation");
            Ok(())
        });
    }

    response
}

/// Mark the response as never cacheable.
pub async fn no_store(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    response
}

/// Layer allowing clients to cache responses for `max_age`.
pub fn client_cache_layer(max_age: Duration) -> SetResponseHeaderLayer<HeaderValue> {
    let value = HeaderValue::from_str(&format!("public, max-age={}", max_age.as_secs()))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));
    SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AuthenticatedUser;

    #[test]
    fn test_key_sorts_query_and_tags_user() {
        let request = Request::builder()
            .uri("/api/skills/?b=2&a=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            response_cache_key(&request),
            r#"http:GET:/api/skills:anonymous:{"a":"1","b":"2"}"#
        );

        let mut request = Request::builder()
            .uri("/api/skills?a=1&b=2")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedUser::new("u1"));
        assert_eq!(
            response_cache_key(&request),
            r#"http:GET:/api/skills:u1:{"a":"1","b":"2"}"#
        );
    }

    #[test]
    fn test_repeated_query_parameters_keep_every_value() {
        let key = |uri: &str| {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            response_cache_key(&request)
        };

        assert_eq!(
            key("/api/skills?tag=rust&tag=go&page=1"),
            r#"http:GET:/api/skills:anonymous:{"page":"1","tag":["rust","go"]}"#
        );
        assert_ne!(key("/api/skills?tag=rust&tag=go"), key("/api/skills?tag=go"));
        assert_eq!(key("/api/skills"), "http:GET:/api/skills:anonymous:{}");
    }

    #[test]
    fn test_escape_glob_metacharacters() {
        assert_eq!(escape_glob("skill"), "skill");
        assert_eq!(escape_glob("a*b?c[1]"), r"a\*b\?c\[1\]");
        assert_eq!(escape_glob(r"back\slash"), r"back\\slash");
    }

    #[test]
    fn test_root_path_normalization() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/api/"), "/api");
        assert_eq!(normalize_path("/api"), "/api");
    }

    #[test]
    fn test_annotated_body() {
        let cached_at = Utc::now();
        let object = CachedResponse {
            body: serde_json::json!({"skills": []}),
            cached_at,
        };
        let annotated = object.annotated_body();
        assert_eq!(annotated["cached"], Value::Bool(true));
        assert_eq!(annotated["skills"], serde_json::json!([]));
        assert_eq!(annotated["cacheTime"], Value::String(cached_at.to_rfc3339()));

        let list = CachedResponse {
            body: serde_json::json!([1, 2]),
            cached_at,
        };
        assert_eq!(list.annotated_body()["data"], serde_json::json!([1, 2]));
    }
}
