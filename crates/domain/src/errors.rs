//! Error types used throughout streamwarden

use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamwarden_common::error::{
    classify_message, CommonError, ErrorClassification, ErrorSeverity, FailureKind,
};
use thiserror::Error;

/// Main error type for streamwarden
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum WardenError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Opaque storage driver failure; classified from its message
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for streamwarden operations
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    /// Timeout error naming the operation and its budget
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::Timeout(format!("'{operation}' timed out after {}ms", after.as_millis()))
    }

    /// Short label for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage",
            Self::Subscription(_) => "subscription",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Unavailable(_) => "unavailable",
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Auth(_) => "auth",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl ErrorClassification for WardenError {
    fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Transient
    }

    fn severity(&self) -> ErrorSeverity {
        match self.failure_kind() {
            FailureKind::Transient => ErrorSeverity::Warning,
            FailureKind::Persistent => ErrorSeverity::Error,
            FailureKind::Fatal => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        self.failure_kind() == FailureKind::Fatal
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network(_)
            | Self::Timeout(_)
            | Self::Subscription(_)
            | Self::CircuitOpen(_)
            | Self::Unavailable(_) => FailureKind::Transient,
            Self::Validation(_) | Self::NotFound(_) | Self::Internal(_) => FailureKind::Persistent,
            Self::Auth(_) | Self::Config(_) => FailureKind::Fatal,
            Self::Storage(message) => classify_message(message).kind,
        }
    }
}

impl From<CommonError> for WardenError {
    fn from(err: CommonError) -> Self {
        match &err {
            CommonError::Config { .. } => Self::Config(err.to_string()),
            CommonError::Timeout { .. } => Self::Timeout(err.to_string()),
            CommonError::Backend { is_retryable: true, .. } => Self::Network(err.to_string()),
            CommonError::Backend { .. } => Self::Storage(err.to_string()),
            CommonError::Validation { .. } => Self::Validation(err.to_string()),
            CommonError::Unauthorized { .. } => Self::Auth(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON: {err}"))
    }
}
