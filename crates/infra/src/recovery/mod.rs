//! Storage recovery and degraded-mode operation

pub mod degradation;
pub mod manager;

pub use degradation::{
    operation_signature, CachedResponse, DegradationCache, QueuedWrite, ReplayFn, WriteQueue,
};
pub use manager::{RecoveryManager, ReplaySummary};
