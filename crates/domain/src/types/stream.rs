//! Change stream supervision status and signals

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::change::{ChangeEvent, CollectionName, ResumeToken};

/// Per-collection subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Stopped,
    Connecting,
    Active,
    Reconnecting,
    /// Reconnect budget spent; needs an explicit restart
    Halted,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Halted => "halted",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signals published by the change stream supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Change(ChangeEvent),
    Connected { collection: CollectionName, resumed: bool },
    Error { collection: CollectionName, message: String },
    /// The subscription ended without an explicit stop
    Ended { collection: CollectionName },
    Reconnecting { collection: CollectionName, attempt: u32, delay: Duration },
    /// Terminal; no further automatic attempts
    MaxRetriesExceeded { collection: CollectionName, attempts: u32 },
    /// Terminal; a fatal failure (auth, configuration) stopped the feed
    Halted { collection: CollectionName, reason: String },
    Stopped { collection: CollectionName },
}

impl StreamSignal {
    pub fn collection(&self) -> &CollectionName {
        match self {
            Self::Change(event) => &event.collection,
            Self::Connected { collection, .. }
            | Self::Error { collection, .. }
            | Self::Ended { collection }
            | Self::Reconnecting { collection, .. }
            | Self::MaxRetriesExceeded { collection, .. }
            | Self::Halted { collection, .. }
            | Self::Stopped { collection } => collection,
        }
    }
}

/// Status of one watched collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub name: CollectionName,
    pub status: StreamStatus,
    pub resume_token: Option<ResumeToken>,
    pub reconnect_attempts: u32,
    pub listeners: usize,
    pub events_delivered: u64,
}

/// Status of the whole supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusReport {
    pub running: bool,
    pub storage_connected: bool,
    pub collections: Vec<CollectionStatus>,
}

impl StreamStatusReport {
    pub fn collection(&self, name: &str) -> Option<&CollectionStatus> {
        self.collections.iter().find(|c| c.name.as_str() == name)
    }

    pub fn all_active(&self) -> bool {
        self.collections.iter().all(|c| c.status == StreamStatus::Active)
    }
}
