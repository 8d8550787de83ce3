//! Rate limiter (C3) and circuit breaker (C4): the two pieces of shared,
//! per-channel resilience state the outbound dispatcher consults before
//! every adapter call.

pub mod circuit;
pub mod limits;
pub mod rate_limit;

pub use circuit::{CircuitBreaker, CircuitState, CircuitThresholds, Decision as CircuitDecision};
pub use limits::ChannelLimits;
pub use rate_limit::{Acquisition, BucketParams, RateLimiter};
