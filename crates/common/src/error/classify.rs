//! Failure classification
//!
//! Maps a raw failure into a [`Classification`]. Typed errors describe
//! themselves through [`ErrorClassification`]; opaque errors (driver errors,
//! boxed errors from collaborators) fall back to keyword matching over their
//! message chain.

use std::fmt;

use super::{CommonError, ErrorClassification, FailureKind};

const FATAL_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication",
    "auth failed",
    "forbidden",
    "permission denied",
    "not authorized",
    "invalid credential",
    "bad credential",
];

const PERSISTENT_MARKERS: &[&str] = &[
    "validation",
    "schema",
    "duplicate key",
    "cast to",
    "invalid document",
    "invalid input",
    "not found",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection",
    "network",
    "reset by peer",
    "broken pipe",
    "not primary",
    "not master",
    "unreachable",
    "temporarily unavailable",
    "interrupted",
];

/// How much the classifier trusts its own verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// The error described itself, or matched a known marker
    High,
    /// Nothing matched; defaulted to transient
    Low,
}

/// Verdict produced by [`classify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Broad failure category
    pub kind: FailureKind,
    /// Whether another attempt may succeed
    pub retryable: bool,
    /// Human-readable reason, suitable for logs
    pub reason: String,
    /// Trust in the verdict
    pub confidence: Confidence,
}

impl Classification {
    fn new(kind: FailureKind, retryable: bool, reason: String, confidence: Confidence) -> Self {
        Self { kind, retryable, reason, confidence }
    }

    /// `true` for `FailureKind::Fatal`
    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Fatal
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (retryable: {}): {}", self.kind, self.retryable, self.reason)
    }
}

/// Classify an error that describes itself
pub fn classify<E>(error: &E) -> Classification
where
    E: ErrorClassification + fmt::Display + ?Sized,
{
    let kind = error.failure_kind();
    let retryable = kind == FailureKind::Transient && error.is_retryable();
    Classification::new(kind, retryable, error.to_string(), Confidence::High)
}

/// Classify an opaque error
///
/// `CommonError` is recognised by downcast; anything else is classified from
/// the concatenated messages of its source chain.
pub fn classify_dyn(error: &(dyn std::error::Error + 'static)) -> Classification {
    if let Some(common) = error.downcast_ref::<CommonError>() {
        return classify(common);
    }

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }

    classify_message(&message)
}

/// Classify a bare failure message by keyword
pub fn classify_message(message: &str) -> Classification {
    let lowered = message.to_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

    if matches(FATAL_MARKERS) {
        Classification::new(FailureKind::Fatal, false, message.to_string(), Confidence::High)
    } else if matches(PERSISTENT_MARKERS) {
        Classification::new(FailureKind::Persistent, false, message.to_string(), Confidence::High)
    } else if matches(TRANSIENT_MARKERS) {
        Classification::new(FailureKind::Transient, true, message.to_string(), Confidence::High)
    } else {
        Classification::new(FailureKind::Transient, true, message.to_string(), Confidence::Low)
    }
}
