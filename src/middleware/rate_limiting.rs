//! # Rate Limiting Middleware
//!
//! Applies the fixed-window [`RateLimiter`] to every request. Authenticated
//! callers are counted as `user:{id}`, everyone else as `ip:{addr}`.
//!
//! Every response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` (unix seconds). Denied requests get 429 with
//! `Retry-After`.
//!
//! ## Usage Example
//! ```ignore
//! let state = RateLimitState::new(limiter, 100, Duration::from_secs(900));
//! let app = Router::new()
//!     .route("/api/skills", get(list_skills))
//!     .layer(from_fn_with_state(state, rate_limit_middleware));
//! ```

use crate::caching::{RateLimitDecision, RateLimiter};
use crate::core::config::RateLimitSettings;
use crate::core::error::ServiceError;
use crate::core::types::{extract_client_ip, request_user_id};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use std::time::Duration;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub limiter: RateLimiter,
    pub limit: u32,
    pub window: Duration,
    pub enabled: bool,
}

impl RateLimitState {
    pub fn new(limiter: RateLimiter, limit: u32, window: Duration) -> Self {
        Self {
            limiter,
            limit,
            window,
            enabled: true,
        }
    }

    pub fn from_settings(limiter: RateLimiter, settings: &RateLimitSettings) -> Self {
        Self {
            limiter,
            limit: settings.requests_per_window,
            window: settings.window,
            enabled: settings.enabled,
        }
    }
}

/// Identifier a request is counted under
pub fn rate_limit_identifier(request: &Request) -> String {
    match request_user_id(request) {
        Some(user_id) => format!("user:{}", user_id),
        None => format!("ip:{}", extract_client_ip(request)),
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        X_RATELIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp().max(0) as u64),
    );
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let identifier = rate_limit_identifier(&request);
    let decision = state
        .limiter
        .check(&identifier, state.limit, state.window)
        .await;

    if !decision.allowed {
        counter!("rate_limit_rejected_total").increment(1);
        let mut response = ServiceError::RateLimitExceeded {
            limit: state.limit,
            window_secs: state.window.as_secs(),
        }
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after_secs()));
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
