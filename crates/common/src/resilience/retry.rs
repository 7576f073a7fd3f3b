//! Generic retry wrapper driven by error classification
//!
//! [`Retry`] invokes an async operation, classifies each failure with
//! [`classify`], and either propagates an annotated [`RetryError`] or sleeps
//! for the backoff delay and tries again. Exactly one of {success, final
//! failure} is returned; nothing is swallowed.
//!
//! ```rust,ignore
//! let connected = Retry::new(config)
//!     .on_retry(|err, attempt, delay| warn!(%err, attempt, ?delay, "reconnecting"))
//!     .run(|| storage.connect())
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::backoff::{
    BackoffPolicy, JitterSource, DEFAULT_INITIAL_DELAY, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_DELAY,
};
use crate::error::{classify, Classification, CommonError, CommonResult, ErrorClassification};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Annotated failure returned by [`Retry::run`]
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The error stayed retryable but the retry budget ran out
    #[error("retries exhausted after {attempts} attempts in {elapsed:?}: {source}")]
    Exhausted { source: E, classification: Classification, attempts: u32, elapsed: Duration },

    /// The error was classified (or judged by `should_retry`) as not worth
    /// retrying
    #[error("non-retryable failure after {attempts} attempts: {source}")]
    NonRetryable { source: E, classification: Classification, attempts: u32, elapsed: Duration },
}

impl<E> RetryError<E> {
    /// Classification of the final failure
    pub fn classification(&self) -> &Classification {
        match self {
            Self::Exhausted { classification, .. } | Self::NonRetryable { classification, .. } => {
                classification
            }
        }
    }

    /// Number of invocations made, including the first
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::NonRetryable { attempts, .. } => *attempts,
        }
    }

    /// Wall time from the first attempt until giving up
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Exhausted { elapsed, .. } | Self::NonRetryable { elapsed, .. } => *elapsed,
        }
    }

    /// Borrow the final underlying error
    pub fn source_error(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }

    /// Discard the annotation and return the final underlying error
    pub fn into_source(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Backoff policy derived from this configuration
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_delay, self.max_delay, self.jitter_factor)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(CommonError::config_field(
                "jitter_factor",
                format!("must be within [0, 1], got {}", self.jitter_factor),
            ));
        }

        if self.initial_delay > self.max_delay {
            return Err(CommonError::config_field(
                "initial_delay",
                format!(
                    "initial_delay ({:?}) cannot be greater than max_delay ({:?})",
                    self.initial_delay, self.max_delay
                ),
            ));
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    pub fn no_jitter(mut self) -> Self {
        self.config.jitter_factor = 0.0;
        self
    }

    pub fn build(self) -> CommonResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

type ShouldRetryFn<E> = Box<dyn Fn(&E, &Classification, u32) -> bool + Send + Sync>;
type OnRetryFn<E> = Box<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Retry executor
///
/// By default an error is retried when its [`Classification`] says it is
/// retryable; [`Retry::should_retry`] replaces that decision.
pub struct Retry<E> {
    config: RetryConfig,
    jitter: JitterSource,
    should_retry: Option<ShouldRetryFn<E>>,
    on_retry: Option<OnRetryFn<E>>,
}

impl<E> fmt::Debug for Retry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("config", &self.config)
            .field("custom_should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl<E> Retry<E>
where
    E: ErrorClassification + fmt::Display,
{
    /// Create an executor with an entropy-seeded jitter source
    pub fn new(config: RetryConfig) -> Self {
        Self { config, jitter: JitterSource::from_entropy(), should_retry: None, on_retry: None }
    }

    /// Use a specific jitter source (seeded sources make delays deterministic)
    pub fn with_jitter(mut self, jitter: JitterSource) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the classification-based retry decision
    ///
    /// The predicate receives the error, its classification and the 1-based
    /// number of the attempt that just failed.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E, &Classification, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Side-effecting hook invoked before each backoff sleep
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Run `operation` until it succeeds, is judged non-retryable, or the
    /// retry budget is spent
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let backoff = self.config.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let classification = classify(&error);
            let retry = match &self.should_retry {
                Some(predicate) => predicate(&error, &classification, attempt),
                None => classification.retryable,
            };

            if !retry {
                debug!(
                    attempt,
                    kind = %classification.kind,
                    reason = %classification.reason,
                    "Failure is not retryable"
                );
                return Err(RetryError::NonRetryable {
                    source: error,
                    classification,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                });
            }

            if attempt > self.config.max_retries {
                warn!(
                    attempts = attempt,
                    reason = %classification.reason,
                    "All retry attempts exhausted"
                );
                return Err(RetryError::Exhausted {
                    source: error,
                    classification,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                });
            }

            let delay = backoff.delay_for(attempt, &self.jitter);
            if let Some(hook) = &self.on_retry {
                hook(&error, attempt, delay);
            }
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %classification.reason,
                "Operation failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Convenience function: retry with classification-based decisions
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ErrorClassification + fmt::Display,
{
    Retry::new(config.clone()).run(operation).await
}
