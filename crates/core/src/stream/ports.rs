//! Port interfaces for the storage client
//!
//! The storage engine is external; these traits describe only the slice of a
//! driver the resilience core supervises: the connection lifecycle, a
//! liveness probe, counters, and per-collection change feeds.

use async_trait::async_trait;
use streamwarden_domain::{
    ChangeEvent, CollectionName, ConnectionState, ConnectionStats, OperationKind, Result,
    ResumeToken, StorageNotification,
};
use tokio::sync::broadcast;

/// Operation kinds a subscription is restricted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    pub operations: Vec<OperationKind>,
}

impl Default for WatchFilter {
    fn default() -> Self {
        Self { operations: OperationKind::ALL.to_vec() }
    }
}

impl WatchFilter {
    pub fn matches(&self, kind: OperationKind) -> bool {
        self.operations.contains(&kind)
    }
}

/// Where a new subscription starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Resume after this token; `None` starts from the current position
    pub resume_after: Option<ResumeToken>,
}

/// Client for the external data store
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Establish the connection
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<()>;

    /// Open a change feed on one collection
    async fn watch(
        &self,
        collection: &CollectionName,
        filter: &WatchFilter,
        options: WatchOptions,
    ) -> Result<Box<dyn ChangeSubscription>>;

    /// Cheap round-trip used as a liveness probe
    async fn ping(&self) -> Result<()>;

    fn connection_state(&self) -> ConnectionState;

    /// Cumulative operation counters
    fn statistics(&self) -> ConnectionStats;

    /// Lifecycle notifications (`connected`, `disconnected`, `error`, `reconnected`)
    fn notifications(&self) -> broadcast::Receiver<StorageNotification>;
}

/// Live handle on one collection's change feed
#[async_trait]
pub trait ChangeSubscription: Send {
    /// Next event in storage order
    ///
    /// `None` means the feed ended naturally; `Some(Err(_))` is a feed error.
    /// Either way the handle is finished.
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>>;

    /// Close the handle; closing twice is a no-op
    async fn close(&mut self) -> Result<()>;
}
