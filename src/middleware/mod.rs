pub mod rate_limiting;
pub mod timing;

pub use rate_limiting::{rate_limit_middleware, RateLimitState};
pub use timing::{timing_middleware, TimingState};
