//! Real-time fan-out of change events
//!
//! Resolves the audience of every change event and publishes it once per
//! channel. How the audience is found depends on the operation:
//!
//! - **insert / replace**: from the full document in the event
//! - **update**: from a point lookup of the current document
//! - **delete**: from the audience index, populated by earlier inserts,
//!   replaces and updates of the same document; dropped when absent
//!
//! Events of one collection arrive sequentially from the supervisor, so their
//! publish order is preserved. Nothing is guaranteed across collections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use moka::sync::Cache;
use serde_json::Value;
use streamwarden_core::{AudienceResolver, DocumentLookup, RealtimeTransport};
use streamwarden_domain::{
    Channel, ChangeEvent, CollectionName, DocumentKey, FanoutSettings, OperationKind, Result,
};
use tracing::{debug, warn};

use crate::stream::ChangeListener;

type AudienceKey = (CollectionName, DocumentKey);

/// Audience plus the looked-up document, if one was fetched
type Resolved = (Vec<Channel>, Option<Value>);

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutStats {
    /// Successful per-channel publishes
    pub published: u64,
    /// Events with no resolvable audience
    pub dropped: u64,
    /// Per-channel publishes the transport rejected
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Publishes change events to the channels of their audience
pub struct FanoutRouter {
    resolver: AudienceResolver,
    transport: Arc<dyn RealtimeTransport>,
    lookup: Arc<dyn DocumentLookup>,
    audiences: Cache<AudienceKey, Arc<[Channel]>>,
    publish_deletes: bool,
    counters: Counters,
}

impl FanoutRouter {
    pub fn new(
        resolver: AudienceResolver,
        transport: Arc<dyn RealtimeTransport>,
        lookup: Arc<dyn DocumentLookup>,
        settings: &FanoutSettings,
    ) -> Self {
        Self {
            resolver,
            transport,
            lookup,
            audiences: Cache::new(settings.delete_index_capacity),
            publish_deletes: settings.publish_deletes,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn drop_event(&self, event: &ChangeEvent, reason: &str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        debug!(
            event = %event.event_name(),
            key = %event.document_key,
            reason,
            "Change event not fanned out"
        );
    }

    fn remember(&self, event: &ChangeEvent, channels: &[Channel]) {
        if self.publish_deletes {
            let key = (event.collection.clone(), event.document_key.clone());
            self.audiences.insert(key, Arc::from(channels));
        }
    }

    /// Audience and payload document for one event; `None` drops it
    async fn resolve(&self, event: &ChangeEvent) -> Result<Option<Resolved>> {
        match event.operation {
            OperationKind::Insert | OperationKind::Replace => {
                let Some(document) = &event.full_document else {
                    self.drop_event(event, "event carries no document");
                    return Ok(None);
                };
                Ok(self.resolve_document(event, document).map(|channels| (channels, None)))
            }
            OperationKind::Update => {
                let document = match &event.full_document {
                    Some(document) => Some(document.clone()),
                    None => self.lookup.find_by_id(&event.collection, &event.document_key).await?,
                };
                let Some(document) = document else {
                    self.drop_event(event, "document no longer exists");
                    return Ok(None);
                };
                Ok(self
                    .resolve_document(event, &document)
                    .map(|channels| (channels, Some(document))))
            }
            OperationKind::Delete => {
                if !self.publish_deletes {
                    self.drop_event(event, "delete fan-out disabled");
                    return Ok(None);
                }
                let key = (event.collection.clone(), event.document_key.clone());
                match self.audiences.remove(&key) {
                    Some(channels) => Ok(Some((channels.to_vec(), None))),
                    None => {
                        self.drop_event(event, "no known audience for deleted document");
                        Ok(None)
                    }
                }
            }
        }
    }

    fn resolve_document(&self, event: &ChangeEvent, document: &Value) -> Option<Vec<Channel>> {
        let Some(channels) = self.resolver.resolve(event.collection.as_str(), document) else {
            self.drop_event(event, "no audience rule for collection");
            return None;
        };
        if channels.is_empty() {
            self.drop_event(event, "document has no addressable audience");
            return None;
        }
        self.remember(event, &channels);
        Some(channels)
    }
}

#[async_trait]
impl ChangeListener for FanoutRouter {
    async fn on_change(&self, event: &ChangeEvent) -> Result<()> {
        let Some((channels, looked_up)) = self.resolve(event).await? else {
            return Ok(());
        };

        let mut payload = serde_json::to_value(event)?;
        if let (Some(document), Value::Object(fields)) = (looked_up, &mut payload) {
            fields.insert("fullDocument".to_string(), document);
        }

        let name = event.event_name();
        for channel in &channels {
            match self.transport.publish(channel, &name, &payload).await {
                Ok(()) => {
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(%channel, event = %name, error = %err, "Publish failed");
                }
            }
        }

        debug!(event = %name, channels = channels.len(), "Change event fanned out");
        Ok(())
    }

    fn name(&self) -> &str {
        "fanout"
    }
}
