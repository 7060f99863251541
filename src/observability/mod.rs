// Structured logging
pub mod logging;

// Process memory sampling
pub mod memory;

// Request performance window
pub mod performance;

pub use logging::init_logging;
pub use memory::MemorySampler;
pub use performance::{PerformanceMetric, PerformanceMonitor, PerformanceStats};
