//! Flow-control primitives for the aixgo-guard security layer
//!
//! Each primitive is independent and safe to share behind an `Arc`:
//! - [`RateLimiter`]: token buckets at global, per-client and per-tool scope
//! - [`CircuitBreaker`]: closed / open / half-open failure isolation
//! - [`TimeoutManager`]: per-operation deadlines derived from a parent
//!   cancellation token
//! - [`retry::retry_with_backoff`]: exponential backoff that stops on
//!   cancellation
//!
//! All time keeping uses [`tokio::time::Instant`], so tests can drive these
//! types with a paused clock.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use rate_limit::{BucketConfig, LimitScope, RateLimitConfig, RateLimitError, RateLimiter};
pub use retry::{RetryError, RetryPolicy, retry_with_backoff};
pub use timeout::{OperationContext, TimeoutConfig, TimeoutError, TimeoutManager};

pub use tokio_util::sync::CancellationToken;
