//! Jittered exponential backoff
//!
//! One formula serves storage reconnection, change-stream resubscription,
//! recovery episodes and generic operation retry:
//!
//! ```text
//! base  = min(initial × 2^(attempt − 1), max)
//! delay = clamp(base + uniform(−jitter × base, +jitter × base), 0, max)
//! ```
//!
//! `attempt` is 1-based. Randomness comes from a [`JitterSource`], which can be
//! seeded for deterministic tests.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default initial delay for the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default jitter factor (0.0 = no jitter, 1.0 = ±100%)
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Maximum exponent for exponential backoff calculation to prevent overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Thread-safe random source for jitter
pub struct JitterSource {
    rng: Mutex<StdRng>,
}

impl JitterSource {
    /// Deterministic source; identical seeds yield identical delay sequences
    pub fn seeded(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    /// Source seeded from the operating system
    pub fn from_entropy() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    fn offset(&self, spread: f64) -> f64 {
        if spread <= 0.0 {
            return 0.0;
        }
        self.rng.lock().gen_range(-spread..=spread)
    }
}

impl Default for JitterSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl fmt::Debug for JitterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitterSource").finish_non_exhaustive()
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Compute the delay before retry number `attempt`
///
/// The result is always within `[0, max_delay]`. An `attempt` of zero is
/// treated as the first attempt, and `jitter_factor` is clamped to `[0, 1]`
/// (non-finite values disable jitter).
pub fn compute_delay(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    jitter: &JitterSource,
) -> Duration {
    let exponent = attempt.max(1).saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let max_ms = saturating_millis(max_delay);
    let base_ms = saturating_millis(initial_delay).saturating_mul(1_u64 << exponent).min(max_ms);

    let factor = if jitter_factor.is_finite() { jitter_factor.clamp(0.0, 1.0) } else { 0.0 };
    if factor == 0.0 || base_ms == 0 {
        return Duration::from_millis(base_ms);
    }

    let base = base_ms as f64;
    let jittered = (base + jitter.offset(base * factor)).clamp(0.0, max_ms as f64);
    Duration::from_millis(jittered.round() as u64).min(max_delay)
}

/// Backoff parameters bundled for reuse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (before jitter)
    pub initial_delay: Duration,
    /// Upper bound on any delay
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy
    pub fn new(initial_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self { initial_delay, max_delay, jitter_factor }
    }

    /// Pure exponential growth without a cap or jitter
    pub fn unbounded(initial_delay: Duration) -> Self {
        Self { initial_delay, max_delay: Duration::MAX, jitter_factor: 0.0 }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, jitter: &JitterSource) -> Duration {
        compute_delay(attempt, self.initial_delay, self.max_delay, self.jitter_factor, jitter)
    }
}
