//! Common error types and classification
//!
//! This module provides the error vocabulary shared by every streamwarden
//! crate. It is built on three pieces:
//!
//! 1. **`CommonError`**: the failures the resilience primitives produce or
//!    are tested against (configuration, timeouts, backend, validation, auth).
//!
//! 2. **`ErrorClassification` trait**: a standard interface describing an
//!    error by retryability, severity, criticality and [`FailureKind`].
//!
//! 3. **[`classify`]**: turns any classifiable error into a
//!    [`Classification`] `{kind, retryable, reason}`. The retry engine, the
//!    circuit breaker and the logging call sites all consume this verdict, so
//!    there is exactly one place that decides whether a failure is worth
//!    retrying.
//!
//! ## Failure kinds
//!
//! | Kind | Typical cause | Retried? |
//! |------|---------------|----------|
//! | **Transient** | network drop, timeout, open circuit, primary step-down | yes |
//! | **Persistent** | validation, schema, duplicate key, not found | no |
//! | **Fatal** | authentication, authorization, bad configuration | no; dependents halt |
//!
//! ## Composing module errors
//!
//! Module-specific errors implement `ErrorClassification` and override
//! [`ErrorClassification::failure_kind`] when the default mapping
//! (retryable → transient, otherwise persistent) is not precise enough:
//!
//! ```rust,ignore
//! impl ErrorClassification for StoreError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Network(_))
//!     }
//!
//!     fn failure_kind(&self) -> FailureKind {
//!         match self {
//!             Self::Network(_) => FailureKind::Transient,
//!             Self::Auth(_) => FailureKind::Fatal,
//!             _ => FailureKind::Persistent,
//!         }
//!     }
//!     // ...
//! }
//! ```

mod classify;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use classify::{classify, classify_dyn, classify_message, Classification, Confidence};

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Error variants shared by the resilience primitives and their callers
#[derive(Debug, Clone)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Timeout errors
    Timeout { operation: String, duration: Duration },

    /// Network or backend connectivity errors
    Backend { service: String, message: String, is_retryable: bool },

    /// Validation errors
    Validation { field: String, message: String },

    /// Authentication or authorization errors
    Unauthorized { operation: String, required_permission: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "Configuration error in field '{}': {}", field, message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Backend { service, message, .. } => {
                write!(f, "Backend error from '{}': {}", service, message)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            Self::Unauthorized { operation, required_permission } => {
                if let Some(perm) = required_permission {
                    write!(f, "Unauthorized to perform '{}' (requires: {})", operation, perm)
                } else {
                    write!(f, "Unauthorized to perform '{}'", operation)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } | Self::Unauthorized { .. } => ErrorSeverity::Critical,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::Backend { .. } | Self::Validation { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Config { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } | Self::Config { .. } => FailureKind::Fatal,
            Self::Timeout { .. } | Self::Backend { is_retryable: true, .. } => {
                FailureKind::Transient
            }
            Self::Backend { .. } | Self::Validation { .. } => FailureKind::Persistent,
        }
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an unauthorized error
    pub fn unauthorized<O: Into<String>>(operation: O) -> Self {
        Self::Unauthorized { operation: operation.into(), required_permission: None }
    }
}

/// Error classification trait for consistent error handling across components
///
/// Implementors describe their failures once; [`classify`] turns that
/// description into the verdict used by retry, circuit breaking and logging.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as network timeouts or a temporarily unreachable primary.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;

    /// Broad failure kind
    ///
    /// Defaults to `Transient` for retryable errors and `Persistent`
    /// otherwise. Override to report `Fatal` conditions.
    fn failure_kind(&self) -> FailureKind {
        if self.is_retryable() {
            FailureKind::Transient
        } else {
            FailureKind::Persistent
        }
    }
}

/// Broad category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network/timeout style failure, worth retrying
    Transient,
    /// Logic/validation failure, retrying cannot help
    Persistent,
    /// Authentication/configuration failure, dependent subsystems should halt
    Fatal,
}

impl FailureKind {
    /// Lowercase label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Persistent => "persistent",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
