pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{DecisionRateLimiter, RateLimitConfig};
