//! Circuit breaker with fallback execution
//!
//! One breaker guards one operation class. The state machine is:
//!
//! ```text
//! closed --(consecutive failures >= threshold)--> open
//! open   --(reset timeout elapsed, next call)--> half-open (one trial)
//! half-open --(trial succeeds)--> closed
//! half-open --(trial fails)-----> open
//! ```
//!
//! The breaker never retries; it only decides whether the underlying call is
//! attempted at all. Retrying is the job of [`super::retry`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity, FailureKind};

/// Default number of consecutive failures before opening
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default time an open circuit waits before admitting a trial call
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_CHANNEL_CAPACITY: usize = 64;

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed time, so a test can hand one clone to the
/// breaker and advance the other.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Errors surfaced by a guarded call
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit is open (or a half-open trial is already in flight)
    #[error("Circuit breaker '{name}' is open, rejecting calls")]
    CircuitOpen { name: String, retry_after: Option<Duration> },

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Result type for guarded calls
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// `true` when the call was rejected without running the operation
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::OperationFailed { source } => source.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::OperationFailed { source } => source.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => false,
            Self::OperationFailed { source } => source.is_critical(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            Self::OperationFailed { source } => source.retry_after(),
        }
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::CircuitOpen { .. } => FailureKind::Transient,
            Self::OperationFailed { source } => source.failure_kind(),
        }
    }
}

//==============================================================================
// State, Configuration, Events
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting a single trial request
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: DEFAULT_FAILURE_THRESHOLD, reset_timeout: DEFAULT_RESET_TIMEOUT }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> CommonResult<()> {
        if self.failure_threshold == 0 {
            return Err(CommonError::config_field(
                "failure_threshold",
                "failure_threshold must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn build(self) -> CommonResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Notifications published by a breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerEvent {
    /// The circuit moved between states
    StateChanged { name: String, from: CircuitState, to: CircuitState },
    /// A call was rejected without running the operation
    Rejected { name: String },
    /// A guarded call succeeded
    Succeeded { name: String },
    /// A guarded call failed
    Failed { name: String, consecutive_failures: u32 },
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub total_calls: u64,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every state change; outcomes of calls admitted under an
    /// older generation are ignored
    generation: u64,
}

impl BreakerCore {
    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
    }
}

#[derive(Debug, Default)]
struct BreakerCounters {
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

enum Admission {
    Normal(u64),
    Trial(u64),
    Rejected(Option<Duration>),
}

/// Releases the half-open trial slot if the trial future is dropped before
/// reporting an outcome.
struct TrialGuard<'a> {
    core: &'a Mutex<BreakerCore>,
    generation: u64,
    armed: bool,
}

impl TrialGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut core = self.core.lock();
            if core.generation == self.generation {
                core.trial_in_flight = false;
            }
        }
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker guarding one operation class
///
/// Clones share state.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    core: Arc<Mutex<BreakerCore>>,
    counters: Arc<BreakerCounters>,
    events: broadcast::Sender<BreakerEvent>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            core: Arc::clone(&self.core),
            counters: Arc::clone(&self.counters),
            events: self.events.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> CommonResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<Arc<str>>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> CommonResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            name: name.into(),
            config,
            core: Arc::new(Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                generation: 0,
            })),
            counters: Arc::new(BreakerCounters::default()),
            events,
            clock: Arc::new(clock),
        })
    }

    /// Name of the guarded operation class
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Subscribe to breaker events
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Current state without triggering any transition
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    /// `false` only while open with the reset timeout still running
    pub fn is_available(&self) -> bool {
        let core = self.core.lock();
        match core.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !core.trial_in_flight,
            CircuitState::Open => self.remaining_cooldown(&core).is_none(),
        }
    }

    /// Remaining cooldown while open
    pub fn retry_after(&self) -> Option<Duration> {
        let core = self.core.lock();
        match core.state {
            CircuitState::Open => self.remaining_cooldown(&core),
            _ => None,
        }
    }

    /// Snapshot of state and counters
    pub fn snapshot(&self) -> CircuitSnapshot {
        let core = self.core.lock();
        CircuitSnapshot {
            name: self.name.to_string(),
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            opened_at: core.opened_at,
            failure_threshold: self.config.failure_threshold,
            reset_timeout: self.config.reset_timeout,
            total_calls: self.counters.total_calls.load(Ordering::Acquire),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Acquire),
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_or_else(operation, || {
            let rejection = ResilienceError::CircuitOpen {
                name: self.name.to_string(),
                retry_after: self.retry_after(),
            };
            async move { Err(rejection) }
        })
        .await
    }

    /// Execute an operation, invoking `fallback` instead when the circuit
    /// rejects the call
    ///
    /// The fallback runs only on rejection; failures of an admitted call are
    /// returned as [`ResilienceError::OperationFailed`].
    pub async fn execute_or_else<F, Fut, G, GFut, T, E>(
        &self,
        operation: F,
        fallback: G,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = ResilienceResult<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (generation, trial) = match self.admit() {
            Admission::Normal(generation) => (generation, None),
            Admission::Trial(generation) => {
                (generation, Some(TrialGuard { core: &self.core, generation, armed: true }))
            }
            Admission::Rejected(retry_after) => {
                self.counters.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(breaker = %self.name, ?retry_after, "Circuit breaker rejecting call");
                self.emit(BreakerEvent::Rejected { name: self.name.to_string() });
                return fallback().await;
            }
        };

        self.counters.total_calls.fetch_add(1, Ordering::Relaxed);
        let outcome = operation().await;

        if let Some(guard) = trial {
            guard.disarm();
        }

        match outcome {
            Ok(value) => {
                self.record_success(generation);
                Ok(value)
            }
            Err(error) => {
                self.record_failure(generation);
                debug!(breaker = %self.name, error = %error, "Guarded operation failed");
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Force the breaker closed and clear its failure count
    pub fn reset(&self) {
        let previous = {
            let mut core = self.core.lock();
            let previous = core.state;
            core.transition(CircuitState::Closed);
            core.consecutive_failures = 0;
            core.opened_at = None;
            core.trial_in_flight = false;
            previous
        };

        if previous != CircuitState::Closed {
            info!(breaker = %self.name, from = %previous, "Circuit breaker manually reset");
            self.emit(BreakerEvent::StateChanged {
                name: self.name.to_string(),
                from: previous,
                to: CircuitState::Closed,
            });
        }
    }

    fn remaining_cooldown(&self, core: &BreakerCore) -> Option<Duration> {
        let opened_at = core.opened_at?;
        let elapsed = self.clock.now().saturating_duration_since(opened_at);
        self.config.reset_timeout.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    fn admit(&self) -> Admission {
        let mut core = self.core.lock();
        match core.state {
            CircuitState::Closed => Admission::Normal(core.generation),
            CircuitState::HalfOpen => {
                if core.trial_in_flight {
                    Admission::Rejected(None)
                } else {
                    core.trial_in_flight = true;
                    Admission::Trial(core.generation)
                }
            }
            CircuitState::Open => match self.remaining_cooldown(&core) {
                Some(left) => Admission::Rejected(Some(left)),
                None => {
                    core.transition(CircuitState::HalfOpen);
                    core.trial_in_flight = true;
                    let generation = core.generation;
                    drop(core);
                    info!(breaker = %self.name, "Circuit breaker half-open, admitting trial call");
                    self.emit(BreakerEvent::StateChanged {
                        name: self.name.to_string(),
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    });
                    Admission::Trial(generation)
                }
            },
        }
    }

    fn record_success(&self, generation: u64) {
        let transitioned = {
            let mut core = self.core.lock();
            if core.generation != generation {
                drop(core);
                debug!(
                    breaker = %self.name,
                    "Ignoring success of call admitted before a state change"
                );
                return;
            }
            core.consecutive_failures = 0;
            if core.state == CircuitState::HalfOpen {
                core.transition(CircuitState::Closed);
                core.opened_at = None;
                core.trial_in_flight = false;
                true
            } else {
                false
            }
        };

        self.emit(BreakerEvent::Succeeded { name: self.name.to_string() });
        if transitioned {
            info!(breaker = %self.name, "Circuit breaker closed after successful trial");
            self.emit(BreakerEvent::StateChanged {
                name: self.name.to_string(),
                from: CircuitState::HalfOpen,
                to: CircuitState::Closed,
            });
        }
    }

    fn record_failure(&self, generation: u64) {
        let now = self.clock.now();
        let (failures, transition) = {
            let mut core = self.core.lock();
            if core.generation != generation {
                drop(core);
                debug!(
                    breaker = %self.name,
                    "Ignoring failure of call admitted before a state change"
                );
                return;
            }
            core.consecutive_failures = core.consecutive_failures.saturating_add(1);
            let transition = match core.state {
                CircuitState::Closed
                    if core.consecutive_failures >= self.config.failure_threshold =>
                {
                    Some(CircuitState::Closed)
                }
                CircuitState::HalfOpen => Some(CircuitState::HalfOpen),
                _ => None,
            };
            if transition.is_some() {
                core.transition(CircuitState::Open);
                core.opened_at = Some(now);
                core.trial_in_flight = false;
            }
            (core.consecutive_failures, transition)
        };

        self.emit(BreakerEvent::Failed {
            name: self.name.to_string(),
            consecutive_failures: failures,
        });

        if let Some(from) = transition {
            warn!(
                breaker = %self.name,
                from = %from,
                consecutive_failures = failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
            self.emit(BreakerEvent::StateChanged {
                name: self.name.to_string(),
                from,
                to: CircuitState::Open,
            });
        }
    }

    fn emit(&self, event: BreakerEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}
