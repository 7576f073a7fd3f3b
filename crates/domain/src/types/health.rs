//! Connection health types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection state reported by the storage client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Cumulative operation counters from the storage client
///
/// The health monitor derives its error-rate samples from the delta between
/// two readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub operations: u64,
    pub failures: u64,
}

impl ConnectionStats {
    /// Failure ratio of the operations recorded since `earlier`
    pub fn error_rate_since(&self, earlier: &ConnectionStats) -> f64 {
        let ops = self.operations.saturating_sub(earlier.operations);
        if ops == 0 {
            return 0.0;
        }
        let failures = self.failures.saturating_sub(earlier.failures).min(ops);
        failures as f64 / ops as f64
    }
}

/// Lifecycle notification fired by the storage client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageNotification {
    Connected,
    Disconnected,
    Reconnected,
    Error { message: String },
}

/// Health figures recomputed on every probe tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub connected: bool,
    pub avg_latency_ms: f64,
    pub last_latency_ms: Option<f64>,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_warnings: u32,
    pub checked_at: Option<DateTime<Utc>>,
}

impl Default for HealthSnapshot {
    fn default() -> Self {
        Self {
            connected: false,
            avg_latency_ms: 0.0,
            last_latency_ms: None,
            error_rate: 0.0,
            consecutive_failures: 0,
            consecutive_warnings: 0,
            checked_at: None,
        }
    }
}

/// Answer of an on-demand health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub snapshot: HealthSnapshot,
}

/// Alert escalation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// Specific condition behind a warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum HealthIssue {
    HighLatency { latency_ms: f64, threshold_ms: f64 },
    HighErrorRate { error_rate: f64, threshold: f64 },
}

impl fmt::Display for HealthIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighLatency { latency_ms, threshold_ms } => {
                write!(f, "latency {latency_ms:.0}ms above {threshold_ms:.0}ms")
            }
            Self::HighErrorRate { error_rate, threshold } => {
                write!(f, "error rate {error_rate:.3} above {threshold:.3}")
            }
        }
    }
}

/// Signals published by the health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum HealthSignal {
    Connected,
    Disconnected,
    Reconnected,
    StorageError { message: String },
    Warning { issue: HealthIssue },
    Unhealthy { consecutive_failures: u32 },
    Alert { level: AlertLevel, reason: String },
    Recovery { after_failures: u32 },
}

impl HealthSignal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnected => "reconnected",
            Self::StorageError { .. } => "storage_error",
            Self::Warning { .. } => "warning",
            Self::Unhealthy { .. } => "unhealthy",
            Self::Alert { .. } => "alert",
            Self::Recovery { .. } => "recovery",
        }
    }
}

impl From<StorageNotification> for HealthSignal {
    fn from(notification: StorageNotification) -> Self {
        match notification {
            StorageNotification::Connected => Self::Connected,
            StorageNotification::Disconnected => Self::Disconnected,
            StorageNotification::Reconnected => Self::Reconnected,
            StorageNotification::Error { message } => Self::StorageError { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate_since() {
        let before = ConnectionStats { operations: 10, failures: 1 };
        let after = ConnectionStats { operations: 30, failures: 6 };
        assert!((after.error_rate_since(&before) - 0.25).abs() < f64::EPSILON);
        assert_eq!(before.error_rate_since(&before), 0.0);
    }

    #[test]
    fn test_notification_maps_to_signal() {
        let signal: HealthSignal = StorageNotification::Error { message: "x".into() }.into();
        assert_eq!(signal.name(), "storage_error");
    }

    #[test]
    fn test_signal_serialization_tag() {
        let json = serde_json::to_value(HealthSignal::Alert {
            level: AlertLevel::Critical,
            reason: "down".into(),
        })
        .expect("json");
        assert_eq!(json["signal"], "alert");
        assert_eq!(json["level"], "critical");
    }
}
