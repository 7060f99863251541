//! # Admin Module
//!
//! Operational endpoints for the caching and performance layer. They expose
//! internal state and can flush the cache, so the host application should
//! mount them behind its own authorization.

pub mod performance;

pub use performance::{create_performance_routes, PerformanceAdminState};
