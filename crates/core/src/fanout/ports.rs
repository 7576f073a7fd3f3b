//! Port interfaces for real-time delivery

use async_trait::async_trait;
use serde_json::Value;
use streamwarden_domain::{Channel, CollectionName, DocumentKey, Result};

/// Addressable publish primitive of the real-time transport
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn publish(&self, channel: &Channel, event: &str, payload: &Value) -> Result<()>;
}

/// Point lookup used to recover addressing context for updates
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    /// `Ok(None)` when the document no longer exists
    async fn find_by_id(&self, collection: &CollectionName, key: &DocumentKey)
        -> Result<Option<Value>>;
}
