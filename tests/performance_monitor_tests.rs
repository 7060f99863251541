//! # Performance Monitor Integration Tests
//!
//! Window eviction, aggregates, percentiles and store mirroring.

use proptest::prelude::*;
use skillswap_cache::caching::KeyValueStore;
use skillswap_cache::core::background::BackgroundTasks;
use skillswap_cache::core::config::PerformanceSettings;
use skillswap_cache::{PerformanceMetric, PerformanceMonitor};
use std::sync::Arc;
use std::time::Duration;

fn metric(index: usize, response_time_ms: u64) -> PerformanceMetric {
    PerformanceMetric {
        path: format!("/api/item/{}", index),
        method: if index % 2 == 0 { "GET" } else { "POST" }.to_string(),
        status_code: 200,
        response_time_ms,
        timestamp_ms: index as i64,
        user_id: None,
        memory_delta_bytes: 0,
    }
}

#[test]
fn test_window_keeps_most_recent_thousand() {
    let monitor = PerformanceMonitor::new(1000, Duration::from_millis(1000));
    for i in 0..1001 {
        monitor.record(metric(i, 10));
    }

    assert_eq!(monitor.len(), 1000);
    assert!(monitor.path_metrics("/api/item/0").is_empty());
    assert_eq!(monitor.path_metrics("/api/item/1").len(), 1);
    assert_eq!(monitor.recent(1)[0].path, "/api/item/1000");
    assert_eq!(monitor.stats().total_requests, 1000);
}

#[test]
fn test_stats_over_empty_and_cleared_window() {
    let monitor = PerformanceMonitor::default();
    let empty = monitor.stats();
    assert_eq!(empty.total_requests, 0);
    assert_eq!(empty.average_response_time, 0);
    assert_eq!(empty.min_response_time, 0);
    assert_eq!(empty.max_response_time, 0);
    assert!(empty.requests_by_method.is_empty());

    monitor.record(metric(0, 1200));
    assert_eq!(monitor.stats().slow_requests, 1);

    monitor.clear();
    assert_eq!(monitor.stats(), empty);
    assert_eq!(monitor.percentile(99.0), 0);
}

#[test]
fn test_stats_serialize_with_camel_case_fields() {
    let monitor = PerformanceMonitor::default();
    monitor.record(metric(0, 40));
    let json = serde_json::to_value(monitor.stats()).unwrap();

    assert_eq!(json["totalRequests"], 1);
    assert_eq!(json["averageResponseTime"], 40);
    assert_eq!(json["requestsByMethod"]["GET"], 1);
    assert_eq!(json["requestsByStatus"]["200"], 1);
}

#[tokio::test]
async fn test_mirroring_follows_settings() {
    let store = Arc::new(KeyValueStore::in_memory());
    let tasks = BackgroundTasks::new();

    let disabled = PerformanceSettings {
        mirror_to_store: false,
        ..Default::default()
    };
    let monitor = PerformanceMonitor::from_settings(&disabled, store.clone(), tasks.clone());
    monitor.record(metric(0, 5));
    tasks.drain().await;
    assert_eq!(store.del_pattern("perf:*").await, 0);

    let enabled = PerformanceSettings::default();
    let monitor = PerformanceMonitor::from_settings(&enabled, store.clone(), tasks.clone());
    monitor.record(metric(0, 5));
    monitor.record(metric(1, 2000));
    tasks.drain().await;

    assert_eq!(store.get("perf:requests:GET").await.as_deref(), Some("1"));
    assert_eq!(store.get("perf:requests:POST").await.as_deref(), Some("1"));
    assert_eq!(store.get("perf:status:200").await.as_deref(), Some("2"));
    assert_eq!(store.get("perf:slow_requests").await.as_deref(), Some("1"));

    // Counters carry no expiry
    assert_eq!(store.ttl("perf:slow_requests").await, -1);
    assert_eq!(store.del_pattern("perf:metric:*").await, 2);
}

#[tokio::test]
async fn test_mirroring_failure_does_not_affect_window() {
    let backend = Arc::new(skillswap_cache::caching::MemoryBackend::new());
    let store = Arc::new(KeyValueStore::new(backend.clone()));
    let tasks = BackgroundTasks::new();
    let monitor = PerformanceMonitor::new(10, Duration::from_secs(1)).with_mirror(
        store,
        tasks.clone(),
        Duration::from_secs(3600),
    );

    backend.set_available(false);
    monitor.record(metric(0, 5));
    tasks.drain().await;

    assert_eq!(monitor.len(), 1);
}

proptest! {
    #[test]
    fn prop_percentiles_are_monotonic(times in prop::collection::vec(0u64..60_000, 0..300)) {
        let monitor = PerformanceMonitor::new(1000, Duration::from_millis(1000));
        for (i, ms) in times.iter().enumerate() {
            monitor.record(metric(i, *ms));
        }

        let p50 = monitor.percentile(50.0);
        let p90 = monitor.percentile(90.0);
        let p99 = monitor.percentile(99.0);
        prop_assert!(p50 <= p90);
        prop_assert!(p90 <= p99);

        if let Some(max) = times.iter().max() {
            prop_assert!(p99 <= *max);
            prop_assert_eq!(monitor.percentile(100.0), *max);
        } else {
            prop_assert_eq!(p99, 0);
        }
    }

    #[test]
    fn prop_window_never_exceeds_capacity(capacity in 1usize..50, count in 0usize..200) {
        let monitor = PerformanceMonitor::new(capacity, Duration::from_millis(1000));
        for i in 0..count {
            monitor.record(metric(i, 1));
        }
        prop_assert_eq!(monitor.len(), count.min(capacity));
    }
}
