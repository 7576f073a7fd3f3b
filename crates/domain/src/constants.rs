//! Default values
//!
//! Centralized location for the defaults used by [`crate::config`].

// Retry engine
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

// Circuit breakers
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 60_000;

// Change streams
pub const DEFAULT_WATCHED_COLLECTIONS: &[&str] =
    &["messages", "chats", "notices", "reports", "friends"];
pub const DEFAULT_SIGNAL_BUFFER: usize = 1_024;

// Health monitor
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LATENCY_THRESHOLD_MS: u64 = 1_000;
pub const DEFAULT_CRITICAL_LATENCY_MS: u64 = 5_000;
pub const DEFAULT_MAX_ERROR_RATE: f64 = 0.1;
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
pub const DEFAULT_ALERT_THRESHOLD: u32 = 5;
pub const DEFAULT_LATENCY_HISTORY: usize = 100;
pub const DEFAULT_ERROR_RATE_HISTORY: usize = 20;

// Recovery manager
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECOVERY_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 1_000;

// Fan-out
pub const DEFAULT_DELETE_INDEX_CAPACITY: u64 = 100_000;

// Logging
pub const DEFAULT_LOG_FILTER: &str = "info";
