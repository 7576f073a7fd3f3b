//! Resilience patterns for fault tolerance
//!
//! - **Backoff**: one jittered exponential formula shared by every retry
//!   loop in the workspace (reconnects, resubscription, recovery episodes).
//! - **Retry**: re-run a fallible async operation while its failure is
//!   classified as retryable.
//! - **Circuit Breaker**: stop calling a failing dependency and serve a
//!   fallback until a trial call proves it healthy again.
//!
//! All three are generic over the error type and consume the verdict of
//! [`crate::error::classify`], so retry decisions and breaker accounting agree
//! on what a transient failure is.

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;

pub use backoff::{compute_delay, BackoffPolicy, JitterSource};
pub use circuit_breaker::{
    BreakerEvent, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitSnapshot, CircuitState, Clock, MockClock, ResilienceError, ResilienceResult,
    SystemClock,
};
pub use retry::{with_retry, Retry, RetryConfig, RetryConfigBuilder, RetryError};
