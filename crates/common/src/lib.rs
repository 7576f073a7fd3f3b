//! Shared building blocks for the streamwarden crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, failure classification, collections
//! - `observability`: tracing instrumentation (not included by default)
//! - `runtime`: async resilience (backoff, retry, circuit breaking)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use collections::SampleWindow;
#[cfg(feature = "foundation")]
pub use error::{
    classify, classify_dyn, classify_message, Classification, CommonError, CommonResult,
    Confidence, ErrorClassification, ErrorSeverity, FailureKind,
};
#[cfg(feature = "runtime")]
pub use resilience::{
    compute_delay, with_retry, BackoffPolicy, BreakerEvent, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitSnapshot, CircuitState, Clock, JitterSource, MockClock,
    ResilienceError, ResilienceResult, Retry, RetryConfig, RetryConfigBuilder, RetryError,
    SystemClock,
};
