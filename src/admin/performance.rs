//! # Performance Admin Module
//!
//! JSON endpoints over the performance window and the cache store, mounted
//! under `/api/performance`:
//!
//! - `GET  /stats` window aggregates, percentiles, uptime and process memory
//! - `GET  /cache-stats` key-value store statistics
//! - `GET  /health` `healthy` or `degraded` depending on store readiness
//! - `GET  /detailed-metrics?path=&limit=` raw metrics
//! - `POST /clear-metrics` empty the in-process window
//! - `POST /clear-cache[?pattern=]` pattern invalidation or full flush
//! - `POST /warmup-cache` pre-populate cache regions in the background

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::caching::{CacheService, WarmupData};
use crate::core::background::BackgroundTasks;
use crate::core::error::{ServiceError, ServiceResult};
use crate::observability::memory::{format_megabytes, MemorySampler};
use crate::observability::performance::PerformanceMonitor;

const DEFAULT_METRIC_LIMIT: usize = 100;
const MAX_METRIC_LIMIT: usize = 1000;

/// Performance admin state
#[derive(Debug, Clone)]
pub struct PerformanceAdminState {
    pub cache: CacheService,
    pub monitor: Arc<PerformanceMonitor>,
    pub tasks: BackgroundTasks,
    pub memory: Arc<MemorySampler>,
    pub started_at: Instant,
}

impl PerformanceAdminState {
    pub fn new(cache: CacheService, monitor: Arc<PerformanceMonitor>, tasks: BackgroundTasks) -> Self {
        Self {
            cache,
            monitor,
            tasks,
            memory: Arc::new(MemorySampler::new()),
            started_at: Instant::now(),
        }
    }

    fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Query for `detailed-metrics`
#[derive(Debug, Default, Deserialize)]
pub struct DetailedMetricsQuery {
    pub path: Option<String>,
    pub limit: Option<usize>,
}

/// Query for `clear-cache`
#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheQuery {
    pub pattern: Option<String>,
}

/// Create performance admin routes
pub fn create_performance_routes() -> Router<PerformanceAdminState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/cache-stats", get(get_cache_stats))
        .route("/health", get(get_health))
        .route("/detailed-metrics", get(get_detailed_metrics))
        .route("/clear-metrics", post(clear_metrics))
        .route("/clear-cache", post(clear_cache))
        .route("/warmup-cache", post(warmup_cache))
}

async fn get_stats(State(state): State<PerformanceAdminState>) -> ServiceResult<Json<Value>> {
    let monitor = &state.monitor;
    let memory_bytes = state.memory.current_bytes();

    counter!("admin_performance_stats_requests").increment(1);

    Ok(Json(json!({
        "success": true,
        "data": {
            "performance": monitor.stats(),
            "percentiles": {
                "p50": monitor.percentile(50.0),
                "p90": monitor.percentile(90.0),
                "p95": monitor.percentile(95.0),
                "p99": monitor.percentile(99.0),
            },
            "window": {
                "size": monitor.len(),
                "capacity": monitor.capacity(),
                "slowThresholdMs": monitor.slow_threshold().as_millis() as u64,
            },
            "uptimeSeconds": state.uptime_secs(),
            "memory": {
                "residentBytes": memory_bytes,
                "resident": format_megabytes(memory_bytes as i64),
            },
            "timestamp": chrono::Utc::now(),
        }
    })))
}

async fn get_cache_stats(State(state): State<PerformanceAdminState>) -> ServiceResult<Json<Value>> {
    let stats = state.cache.store().stats().await;

    counter!("admin_cache_stats_requests").increment(1);

    Ok(Json(json!({
        "success": true,
        "data": {
            "backend": state.cache.store().backend_name(),
            "hitRatio": stats.hit_ratio(),
            "stats": stats,
        }
    })))
}

async fn get_health(State(state): State<PerformanceAdminState>) -> Json<Value> {
    let ready = state.cache.is_ready();
    let status = if ready { "healthy" } else { "degraded" };

    Json(json!({
        "success": true,
        "data": {
            "status": status,
            "cache": {
                "ready": ready,
                "backend": state.cache.store().backend_name(),
            },
            "uptimeSeconds": state.uptime_secs(),
            "timestamp": chrono::Utc::now(),
        }
    }))
}

async fn get_detailed_metrics(
    State(state): State<PerformanceAdminState>,
    Query(query): Query<DetailedMetricsQuery>,
) -> ServiceResult<Json<Value>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_METRIC_LIMIT)
        .min(MAX_METRIC_LIMIT);

    let metrics = match &query.path {
        Some(path) => {
            let mut metrics = state.monitor.path_metrics(path);
            metrics.reverse();
            metrics.truncate(limit);
            metrics
        }
        None => state.monitor.recent(limit),
    };

    Ok(Json(json!({
        "success": true,
        "data": {
            "path": query.path,
            "count": metrics.len(),
            "metrics": metrics,
        }
    })))
}

async fn clear_metrics(State(state): State<PerformanceAdminState>) -> Json<Value> {
    let cleared = state.monitor.len();
    state.monitor.clear();
    info!(cleared, "Performance metrics cleared");
    counter!("admin_performance_clear_requests").increment(1);

    Json(json!({
        "success": true,
        "message": "Performance metrics cleared",
        "data": { "cleared": cleared }
    }))
}

async fn clear_cache(
    State(state): State<PerformanceAdminState>,
    Query(query): Query<ClearCacheQuery>,
) -> ServiceResult<Json<Value>> {
    match query.pattern.filter(|p| !p.is_empty()) {
        Some(pattern) => {
            let removed = state.cache.invalidate_pattern(&pattern).await;
            Ok(Json(json!({
                "success": true,
                "message": format!("Cleared cache entries matching {}", pattern),
                "data": { "pattern": pattern, "removed": removed }
            })))
        }
        None => {
            if !state.cache.store().flush_all().await {
                return Err(ServiceError::cache("cache store unavailable, nothing flushed"));
            }
            Ok(Json(json!({
                "success": true,
                "message": "Cache flushed",
            })))
        }
    }
}

async fn warmup_cache(
    State(state): State<PerformanceAdminState>,
    Json(data): Json<WarmupData>,
) -> (StatusCode, Json<Value>) {
    let cache = state.cache.clone();
    state.tasks.spawn("cache_warmup", async move {
        let report = cache.warmup(data).await;
        if report.failed > 0 {
            return Err(ServiceError::cache(format!(
                "{} warmup writes failed",
                report.failed
            )));
        }
        Ok(())
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": "Cache warmup started",
        })),
    )
}
