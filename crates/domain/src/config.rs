//! Configuration structures
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides. Durations are stored as integer milliseconds (`*_ms`) and
//! exposed as [`Duration`] through accessor methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::{Result, WardenError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub retry: RetrySettings,
    pub circuit: CircuitSettings,
    pub stream: StreamSettings,
    pub health: HealthSettings,
    pub recovery: RecoverySettings,
    pub fanout: FanoutSettings,
    pub logging: LoggingConfig,
}

impl WardenConfig {
    /// Validate every section
    ///
    /// # Errors
    /// Returns `WardenError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.retry.validate("retry")?;
        self.circuit.validate()?;
        self.stream.validate()?;
        self.health.validate()?;
        self.recovery.validate()?;
        self.fanout.validate()?;
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> WardenError {
    WardenError::Config(format!("{field}: {message}"))
}

fn check_jitter(field: &str, jitter: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&jitter) {
        return Err(invalid(field, "jitter_factor must be within [0, 1]"));
    }
    Ok(())
}

/// Generic operation retry (storage connect, application calls)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(invalid(section, "max_delay_ms must be >= initial_delay_ms"));
        }
        check_jitter(section, self.jitter_factor)
    }
}

/// Per-operation-class circuit breakers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
        }
    }
}

impl CircuitSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(invalid("circuit.failure_threshold", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Change stream supervision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Collections watched by the supervisor
    pub collections: Vec<String>,
    /// Reconnect attempts before a collection halts
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    /// Capacity of the signal broadcast channels
    pub signal_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            collections: DEFAULT_WATCHED_COLLECTIONS.iter().map(|c| (*c).to_string()).collect(),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            signal_buffer: DEFAULT_SIGNAL_BUFFER,
        }
    }
}

impl StreamSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.collections.iter().any(|c| c.trim().is_empty()) {
            return Err(invalid("stream.collections", "collection names must not be empty"));
        }
        if self.signal_buffer == 0 {
            return Err(invalid("stream.signal_buffer", "must be greater than 0"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(invalid("stream", "max_delay_ms must be >= initial_delay_ms"));
        }
        check_jitter("stream", self.jitter_factor)
    }
}

/// Health monitor thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub latency_threshold_ms: u64,
    pub critical_latency_ms: u64,
    pub max_error_rate: f64,
    pub unhealthy_threshold: u32,
    pub alert_threshold: u32,
    pub latency_history: usize,
    pub error_rate_history: usize,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_HEALTH_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            latency_threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS,
            critical_latency_ms: DEFAULT_CRITICAL_LATENCY_MS,
            max_error_rate: DEFAULT_MAX_ERROR_RATE,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            latency_history: DEFAULT_LATENCY_HISTORY,
            error_rate_history: DEFAULT_ERROR_RATE_HISTORY,
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(invalid("health.interval_ms", "must be greater than 0"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("health.probe_timeout_ms", "must be greater than 0"));
        }
        if self.critical_latency_ms < self.latency_threshold_ms {
            return Err(invalid(
                "health.critical_latency_ms",
                "must be >= latency_threshold_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(invalid("health.max_error_rate", "must be within [0, 1]"));
        }
        if self.unhealthy_threshold == 0 || self.alert_threshold == 0 {
            return Err(invalid("health", "unhealthy and alert thresholds must be greater than 0"));
        }
        if self.latency_history == 0 || self.error_rate_history == 0 {
            return Err(invalid("health", "history sizes must be greater than 0"));
        }
        Ok(())
    }
}

/// Recovery manager and graceful degradation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub max_attempts: u32,
    /// Base of the `backoff × 2^(attempt − 1)` recovery delay
    pub backoff_ms: u64,
    pub operation_timeout_ms: u64,
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
    pub write_queue_capacity: usize,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            backoff_ms: DEFAULT_RECOVERY_BACKOFF_MS,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
        }
    }
}

impl RecoverySettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid("recovery.max_attempts", "must be greater than 0"));
        }
        if self.operation_timeout_ms == 0 {
            return Err(invalid("recovery.operation_timeout_ms", "must be greater than 0"));
        }
        if self.cache_capacity == 0 || self.write_queue_capacity == 0 {
            return Err(invalid("recovery", "cache and queue capacities must be greater than 0"));
        }
        Ok(())
    }
}

/// Fan-out router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutSettings {
    /// Entries kept in the document → audience index consulted on deletes
    pub delete_index_capacity: u64,
    /// Publish delete notifications when the audience is known
    pub publish_deletes: bool,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self { delete_index_capacity: DEFAULT_DELETE_INDEX_CAPACITY, publish_deletes: true }
    }
}

impl FanoutSettings {
    fn validate(&self) -> Result<()> {
        if self.publish_deletes && self.delete_index_capacity == 0 {
            return Err(invalid("fanout.delete_index_capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: DEFAULT_LOG_FILTER.to_string(), format: LogFormat::Pretty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WardenConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.circuit.reset_timeout(), Duration::from_secs(60));
        assert_eq!(config.health.interval(), Duration::from_secs(30));
        assert_eq!(config.recovery.backoff(), Duration::from_millis(5000));
        assert_eq!(config.stream.collections.len(), 5);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: WardenConfig = parse_json(r#"{"circuit": {"failure_threshold": 3}}"#);
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.reset_timeout_ms, 60_000);
        assert_eq!(config.health, HealthSettings::default());
    }

    fn parse_json(json: &str) -> WardenConfig {
        serde_json::from_str(json).expect("valid json")
    }

    /// Validates rejection of nonsensical values.
    ///
    /// Assertions:
    /// - Zero failure threshold, jitter above 1, and critical latency below
    ///   the warning latency each fail validation.
    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = WardenConfig::default();
        config.circuit.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));

        let mut config = WardenConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.health.critical_latency_ms = 10;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.stream.collections.push("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_parses_lowercase() {
        let logging: LoggingConfig =
            serde_json::from_str(r#"{"format": "json"}"#).expect("valid json");
        assert_eq!(logging.format, LogFormat::Json);
        assert_eq!(logging.filter, "info");
    }
}
