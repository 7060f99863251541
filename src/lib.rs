//! # SkillSwap Cache Library
//!
//! Caching and request-performance layer for the SkillSwap marketplace API.
//!
//! ## Architecture Overview
//!
//! - `caching`: key-value store backends, the fault-tolerant store adapter,
//!   domain cache regions, the fixed-window rate limiter and HTTP cache
//!   middleware
//! - `middleware`: rate-limit and request-timing middleware
//! - `observability`: logging bootstrap, performance monitor, memory sampler
//! - `admin`: performance and cache administration endpoints
//! - `server`: application context, router assembly and the HTTP server
//!
//! A store outage never fails a request. Reads miss, writes are skipped, and
//! rate limiting lets traffic through.

/// Core functionality: error types, configuration, request types and
/// background task submission
pub mod core;

/// Store backends, cache regions, rate limiting and HTTP cache middleware
pub mod caching;

/// Request middleware: rate limiting and timing
pub mod middleware;

/// Logging and request performance monitoring
pub mod observability;

/// Performance and cache administration endpoints
pub mod admin;

/// Application context and HTTP server
pub mod server;

pub use caching::{
    CachePrefix, CacheService, CacheTtl, KeyValueStore, RateLimitDecision, RateLimiter,
    StoreStats,
};
pub use core::background::BackgroundTasks;
pub use core::config::AppConfig;
pub use core::error::{ServiceError, ServiceResult};
pub use core::types::AuthenticatedUser;
pub use observability::performance::{PerformanceMetric, PerformanceMonitor, PerformanceStats};
pub use server::AppContext;
