//! Recovery bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recovery manager bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryState {
    pub is_recovering: bool,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub successes: u64,
    pub failures: u64,
    /// Set once the attempt budget is spent; cleared only by a success
    pub exhausted: bool,
}

impl RecoveryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            is_recovering: false,
            attempt_count: 0,
            max_attempts,
            last_attempt_at: None,
            successes: 0,
            failures: 0,
            exhausted: false,
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// Signals published by the recovery manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RecoverySignal {
    Started { attempt: u32 },
    Succeeded { attempt: u32 },
    Failed { attempt: u32, reason: String },
    /// Terminal; emitted once per exhaustion
    MaxAttemptsExceeded { attempts: u32 },
    WritesReplayed { replayed: usize, failed: usize },
}
