//! Degraded-mode stores: read cache and write queue
//!
//! - **Degradation cache**: last good result of each cacheable read, keyed by
//!   the SHA-256 of the canonical `[class, name, args]` JSON. Bounded by
//!   capacity and TTL.
//! - **Write queue**: bounded FIFO of writes accepted while the write circuit
//!   is open, replayed in order after recovery.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use streamwarden_domain::{OperationRequest, Result, WardenError};
use tracing::debug;
use uuid::Uuid;

/// Canonical form: object keys sorted at every level
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stable signature of an operation request
///
/// Equal for requests whose arguments differ only in object key order.
pub fn operation_signature(request: &OperationRequest) -> String {
    let canonical = Value::Array(vec![
        Value::String(request.class.as_str().to_string()),
        Value::String(request.name.clone()),
        canonicalize(&request.args),
    ]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

/// A cached read result
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub value: Value,
    pub captured_at: DateTime<Utc>,
}

/// Bounded TTL cache of successful read results
#[derive(Clone)]
pub struct DegradationCache {
    entries: Cache<String, CachedResponse>,
}

impl fmt::Debug for DegradationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegradationCache").field("entries", &self.entries.entry_count()).finish()
    }
}

impl DegradationCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let entries = Cache::builder().max_capacity(capacity).time_to_live(ttl).build();
        Self { entries }
    }

    pub fn store(&self, request: &OperationRequest, value: Value) {
        let key = operation_signature(request);
        debug!(operation = %request.name, signature = %key, "Caching read result");
        self.entries.insert(key, CachedResponse { value, captured_at: Utc::now() });
    }

    pub fn lookup(&self, request: &OperationRequest) -> Option<CachedResponse> {
        self.entries.get(&operation_signature(request))
    }

    /// Approximate; moka applies evictions lazily
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Re-issues a queued write
pub type ReplayFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A write accepted while storage was unavailable
#[derive(Clone)]
pub struct QueuedWrite {
    pub ticket: Uuid,
    pub request: OperationRequest,
    pub enqueued_at: DateTime<Utc>,
    pub(crate) replay: ReplayFn,
}

impl fmt::Debug for QueuedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedWrite")
            .field("ticket", &self.ticket)
            .field("operation", &self.request.name)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Bounded FIFO of queued writes
#[derive(Debug)]
pub struct WriteQueue {
    entries: Mutex<VecDeque<QueuedWrite>>,
    capacity: usize,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), capacity }
    }

    /// Append a write and return its ticket
    ///
    /// # Errors
    /// Returns `WardenError::Unavailable` when the queue is full.
    pub fn enqueue(&self, request: OperationRequest, replay: ReplayFn) -> Result<Uuid> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(WardenError::Unavailable(format!(
                "write queue full ({} pending), '{}' rejected",
                entries.len(),
                request.name
            )));
        }

        let ticket = Uuid::now_v7();
        entries.push_back(QueuedWrite { ticket, request, enqueued_at: Utc::now(), replay });
        Ok(ticket)
    }

    /// Take every queued write, oldest first
    pub fn drain(&self) -> Vec<QueuedWrite> {
        self.entries.lock().drain(..).collect()
    }

    /// Put writes back at the head, keeping their order ahead of newer ones
    pub fn requeue_front(&self, writes: Vec<QueuedWrite>) {
        let mut entries = self.entries.lock();
        for write in writes.into_iter().rev() {
            entries.push_front(write);
        }
    }

    pub fn tickets(&self) -> Vec<Uuid> {
        self.entries.lock().iter().map(|w| w.ticket).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
