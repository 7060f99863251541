//! # Request Timing Middleware
//!
//! Measures each request from entry to the handler's response, records a
//! [`PerformanceMetric`] and stamps `X-Response-Time` and `X-Memory-Usage` on
//! the response before it is sent.

use crate::core::types::request_user_id;
use crate::observability::memory::{format_megabytes, MemorySampler};
use crate::observability::performance::{PerformanceMetric, PerformanceMonitor};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;

pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");
pub const X_MEMORY_USAGE: HeaderName = HeaderName::from_static("x-memory-usage");

#[derive(Debug, Clone)]
pub struct TimingState {
    pub monitor: Arc<PerformanceMonitor>,
    pub memory: Arc<MemorySampler>,
}

impl TimingState {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self {
            monitor,
            memory: Arc::new(MemorySampler::new()),
        }
    }
}

pub async fn timing_middleware(
    State(state): State<TimingState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let start_memory = state.memory.current_bytes();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let user_id = request_user_id(&request);

    let mut response = next.run(request).await;

    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    let memory_delta_bytes = state.memory.current_bytes() as i64 - start_memory as i64;

    state.monitor.record(PerformanceMetric {
        path,
        method,
        status_code: response.status().as_u16(),
        response_time_ms: elapsed_ms,
        timestamp_ms: Utc::now().timestamp_millis(),
        user_id,
        memory_delta_bytes,
    });

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed_ms)) {
        headers.insert(X_RESPONSE_TIME, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format_megabytes(memory_delta_bytes)) {
        headers.insert(X_MEMORY_USAGE, value);
    }

    response
}
