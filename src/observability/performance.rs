//! # Performance Monitor
//!
//! Keeps the most recent request metrics in a bounded in-process window and
//! derives aggregate statistics and nearest-rank percentiles from it. The
//! window is per process; it is not shared between instances and does not
//! survive a restart.
//!
//! Each recorded metric is also mirrored into the key-value store as a
//! background task: a copy under `perf:metric:{uuid}` with a fixed expiry,
//! plus running counters `perf:requests:{method}`, `perf:status:{code}` and
//! `perf:slow_requests`.

use crate::caching::{CachePrefix, KeyValueStore};
use crate::core::background::BackgroundTasks;
use crate::core::config::PerformanceSettings;
use crate::core::error::ServiceError;
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// One completed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub response_time_ms: u64,
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub memory_delta_bytes: i64,
}

/// Aggregates over the current window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub average_response_time: u64,
    pub slow_requests: usize,
    pub min_response_time: u64,
    pub max_response_time: u64,
    pub requests_by_method: BTreeMap<String, usize>,
    pub requests_by_status: BTreeMap<u16, usize>,
}

#[derive(Debug, Clone)]
struct StoreMirror {
    store: Arc<KeyValueStore>,
    tasks: BackgroundTasks,
    metric_ttl: Duration,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    window: RwLock<VecDeque<PerformanceMetric>>,
    capacity: usize,
    slow_threshold: Duration,
    mirror: Option<StoreMirror>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(1000, Duration::from_millis(1000))
    }
}

impl PerformanceMonitor {
    /// In-process monitor without store mirroring
    pub fn new(capacity: usize, slow_threshold: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            slow_threshold,
            mirror: None,
        }
    }

    /// Monitor configured from settings, mirroring into `store` when enabled
    pub fn from_settings(
        settings: &PerformanceSettings,
        store: Arc<KeyValueStore>,
        tasks: BackgroundTasks,
    ) -> Self {
        let monitor = Self::new(settings.capacity, settings.slow_threshold);
        if settings.mirror_to_store {
            monitor.with_mirror(store, tasks, settings.metric_ttl)
        } else {
            monitor
        }
    }

    pub fn with_mirror(
        mut self,
        store: Arc<KeyValueStore>,
        tasks: BackgroundTasks,
        metric_ttl: Duration,
    ) -> Self {
        self.mirror = Some(StoreMirror {
            store,
            tasks,
            metric_ttl,
        });
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    fn is_slow(&self, metric: &PerformanceMetric) -> bool {
        u128::from(metric.response_time_ms) > self.slow_threshold.as_millis()
    }

    /// Append a metric, evicting the oldest beyond capacity.
    pub fn record(&self, metric: PerformanceMetric) {
        let slow = self.is_slow(&metric);
        if slow {
            warn!(
                path = %metric.path,
                method = %metric.method,
                status = metric.status_code,
                elapsed_ms = metric.response_time_ms,
                "Slow request"
            );
            counter!("http_slow_requests_total").increment(1);
        } else {
            debug!(
                path = %metric.path,
                method = %metric.method,
                status = metric.status_code,
                elapsed_ms = metric.response_time_ms,
                "Request recorded"
            );
        }

        counter!(
            "http_requests_total",
            "method" => metric.method.clone(),
            "status" => metric.status_code.to_string()
        )
        .increment(1);
        histogram!("http_response_time_ms").record(metric.response_time_ms as f64);

        if let Some(mirror) = &self.mirror {
            Self::mirror(mirror, metric.clone(), slow);
        }

        let mut window = self.window.write();
        window.push_back(metric);
        while window.len() > self.capacity {
            window.pop_front();
        }
    }

    fn mirror(mirror: &StoreMirror, metric: PerformanceMetric, slow: bool) {
        let store = mirror.store.clone();
        let ttl = mirror.metric_ttl;
        mirror.tasks.spawn("performance_mirror", async move {
            let key = CachePrefix::Performance.key(&format!("metric:{}", Uuid::new_v4()));
            let stored = store.set_json(&key, &metric, Some(ttl)).await;

            store
                .incr(&CachePrefix::Performance.key(&format!("requests:{}", metric.method)))
                .await;
            store
                .incr(&CachePrefix::Performance.key(&format!("status:{}", metric.status_code)))
                .await;
            if slow {
                store
                    .incr(&CachePrefix::Performance.key("slow_requests"))
                    .await;
            }

            if stored {
                Ok(())
            } else {
                Err(ServiceError::cache("failed to mirror performance metric"))
            }
        });
    }

    /// Aggregates over the current window; zeroed when empty
    pub fn stats(&self) -> PerformanceStats {
        let window = self.window.read();
        if window.is_empty() {
            return PerformanceStats::default();
        }

        let mut stats = PerformanceStats {
            total_requests: window.len(),
            min_response_time: u64::MAX,
            ..Default::default()
        };
        let mut total: u128 = 0;

        for metric in window.iter() {
            total += u128::from(metric.response_time_ms);
            stats.min_response_time = stats.min_response_time.min(metric.response_time_ms);
            stats.max_response_time = stats.max_response_time.max(metric.response_time_ms);
            if self.is_slow(metric) {
                stats.slow_requests += 1;
            }
            *stats
                .requests_by_method
                .entry(metric.method.clone())
                .or_insert(0) += 1;
            *stats
                .requests_by_status
                .entry(metric.status_code)
                .or_insert(0) += 1;
        }

        stats.average_response_time = (total as f64 / window.len() as f64).round() as u64;
        stats
    }

    /// Nearest-rank percentile of response times; 0 for an empty window.
    /// `p` is clamped to `0..=100`.
    pub fn percentile(&self, p: f64) -> u64 {
        let mut times: Vec<u64> = self
            .window
            .read()
            .iter()
            .map(|m| m.response_time_ms)
            .collect();
        if times.is_empty() {
            return 0;
        }

        times.sort_unstable();
        let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };
        let rank = (p * times.len() as f64 / 100.0).ceil() as usize;
        let index = rank.saturating_sub(1).min(times.len() - 1);
        times[index]
    }

    /// Metrics recorded for exactly `path`, oldest first
    pub fn path_metrics(&self, path: &str) -> Vec<PerformanceMetric> {
        self.window
            .read()
            .iter()
            .filter(|m| m.path == path)
            .cloned()
            .collect()
    }

    /// Up to `limit` metrics, newest first
    pub fn recent(&self, limit: usize) -> Vec<PerformanceMetric> {
        self.window
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Empty the window. Store copies and counters are untouched.
    pub fn clear(&self) {
        self.window.write().clear();
    }

    pub fn len(&self) -> usize {
        self.window.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(path: &str, method: &str, status: u16, ms: u64) -> PerformanceMetric {
        PerformanceMetric {
            path: path.to_string(),
            method: method.to_string(),
            status_code: status,
            response_time_ms: ms,
            timestamp_ms: 0,
            user_id: None,
            memory_delta_bytes: 0,
        }
    }

    #[test]
    fn test_empty_window() {
        let monitor = PerformanceMonitor::default();
        assert_eq!(monitor.stats(), PerformanceStats::default());
        assert_eq!(monitor.percentile(50.0), 0);
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_stats_breakdown() {
        let monitor = PerformanceMonitor::new(10, Duration::from_millis(1000));
        monitor.record(metric("/a", "GET", 200, 10));
        monitor.record(metric("/a", "GET", 200, 25));
        monitor.record(metric("/b", "POST", 201, 1500));
        monitor.record(metric("/b", "POST", 500, 1000));

        let stats = monitor.stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.average_response_time, 634);
        assert_eq!(stats.slow_requests, 1);
        assert_eq!(stats.min_response_time, 10);
        assert_eq!(stats.max_response_time, 1500);
        assert_eq!(stats.requests_by_method["GET"], 2);
        assert_eq!(stats.requests_by_method["POST"], 2);
        assert_eq!(stats.requests_by_status[&200], 2);
        assert_eq!(stats.requests_by_status[&500], 1);
    }

    #[test]
    fn test_nearest_rank_percentile() {
        let monitor = PerformanceMonitor::new(100, Duration::from_secs(1));
        for ms in [50, 10, 40, 20, 30] {
            monitor.record(metric("/", "GET", 200, ms));
        }

        assert_eq!(monitor.percentile(0.0), 10);
        assert_eq!(monitor.percentile(20.0), 10);
        assert_eq!(monitor.percentile(50.0), 30);
        assert_eq!(monitor.percentile(90.0), 50);
        assert_eq!(monitor.percentile(100.0), 50);
        assert_eq!(monitor.percentile(250.0), 50);
    }

    #[test]
    fn test_fifo_eviction() {
        let monitor = PerformanceMonitor::new(3, Duration::from_secs(1));
        for ms in 1..=5 {
            monitor.record(metric("/", "GET", 200, ms));
        }
        let kept: Vec<u64> = monitor
            .recent(10)
            .into_iter()
            .map(|m| m.response_time_ms)
            .collect();
        assert_eq!(kept, vec![5, 4, 3]);
    }

    #[test]
    fn test_path_filter_and_clear() {
        let monitor = PerformanceMonitor::default();
        monitor.record(metric("/a", "GET", 200, 1));
        monitor.record(metric("/ab", "GET", 200, 2));
        monitor.record(metric("/a", "GET", 404, 3));

        let a = monitor.path_metrics("/a");
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|m| m.path == "/a"));

        monitor.clear();
        assert_eq!(monitor.len(), 0);
    }

    #[tokio::test]
    async fn test_mirror_writes_metric_and_counters() {
        let store = Arc::new(KeyValueStore::in_memory());
        let tasks = BackgroundTasks::new();
        let monitor = PerformanceMonitor::new(10, Duration::from_millis(100)).with_mirror(
            store.clone(),
            tasks.clone(),
            Duration::from_secs(3600),
        );

        monitor.record(metric("/a", "GET", 200, 5));
        monitor.record(metric("/a", "GET", 503, 500));
        tasks.drain().await;

        assert_eq!(store.get("perf:requests:GET").await.as_deref(), Some("2"));
        assert_eq!(store.get("perf:status:503").await.as_deref(), Some("1"));
        assert_eq!(store.get("perf:slow_requests").await.as_deref(), Some("1"));
        assert_eq!(store.del_pattern("perf:metric:*").await, 2);
    }
}
