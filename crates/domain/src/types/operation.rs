//! Operation classes and degraded outcomes

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Operation class guarded by its own circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
    Query,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] = [Self::Read, Self::Write, Self::Query];

    /// Dense index for array-backed registries
    pub const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Query => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Query => "query",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes one call routed through the recovery manager
///
/// `name` and `args` together form the degradation-cache signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub class: OperationClass,
    pub name: String,
    pub args: Value,
    /// Successful reads are cached and may be served while degraded
    pub cacheable: bool,
}

impl OperationRequest {
    pub fn read(name: impl Into<String>, args: Value) -> Self {
        Self { class: OperationClass::Read, name: name.into(), args, cacheable: true }
    }

    pub fn write(name: impl Into<String>, args: Value) -> Self {
        Self { class: OperationClass::Write, name: name.into(), args, cacheable: false }
    }

    pub fn query(name: impl Into<String>, args: Value) -> Self {
        Self { class: OperationClass::Query, name: name.into(), args, cacheable: false }
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }
}

/// Where an operation's answer came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum OutcomeSource {
    /// The underlying call ran and succeeded
    Live,
    /// Served from the degradation cache; possibly stale
    #[serde(rename_all = "camelCase")]
    FromCache { captured_at: DateTime<Utc> },
    /// Deferred to the write queue for replay after recovery
    Queued { ticket: Uuid },
}

/// Result of a call made through the recovery manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// `None` for queued writes
    pub value: Option<Value>,
    #[serde(flatten)]
    pub source: OutcomeSource,
}

impl OperationOutcome {
    pub fn live(value: Value) -> Self {
        Self { value: Some(value), source: OutcomeSource::Live }
    }

    pub fn from_cache(value: Value, captured_at: DateTime<Utc>) -> Self {
        Self { value: Some(value), source: OutcomeSource::FromCache { captured_at } }
    }

    pub fn queued(ticket: Uuid) -> Self {
        Self { value: None, source: OutcomeSource::Queued { ticket } }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.source, OutcomeSource::Live)
    }

    pub fn is_from_cache(&self) -> bool {
        matches!(self.source, OutcomeSource::FromCache { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self.source, OutcomeSource::Queued { .. })
    }
}
