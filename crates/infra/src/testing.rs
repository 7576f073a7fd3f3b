//! In-memory adapters for tests and local wiring
//!
//! - [`InMemoryStorage`]: scripted storage client with per-collection feeds
//!   and injectable connect, ping and watch failures
//! - [`RecordingTransport`]: records every publish, can reject chosen channels
//! - [`InMemoryLookup`]: point lookups over a concurrent map
//!
//! Every counter is cumulative for the lifetime of the adapter.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use streamwarden_core::{
    ChangeSubscription, DocumentLookup, RealtimeTransport, StorageClient, WatchFilter,
    WatchOptions,
};
use streamwarden_domain::{
    ChangeEvent, Channel, CollectionName, ConnectionState, ConnectionStats, DocumentKey, Result,
    ResumeToken, StorageNotification, WardenError,
};
use tokio::sync::{broadcast, mpsc};

const NOTIFICATION_BUFFER: usize = 64;

/// One scripted item on a collection feed
#[derive(Debug, Clone)]
pub enum FeedItem {
    Event(ChangeEvent),
    /// Fails the subscription that reads it
    Error(WardenError),
    /// Ends the subscription that reads it
    End,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<FeedItem>>>;

/// Feed shared by every subscription on one collection
///
/// Items are consumed once; a reconnecting subscription continues where the
/// previous one stopped.
#[derive(Clone)]
struct Feed {
    sender: mpsc::UnboundedSender<FeedItem>,
    receiver: SharedReceiver,
}

impl Feed {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver: Arc::new(tokio::sync::Mutex::new(receiver)) }
    }
}

#[derive(Debug, Default)]
struct Counters {
    connect: AtomicU64,
    disconnect: AtomicU64,
    ping: AtomicU64,
    watch: AtomicU64,
    closed: AtomicU64,
    operations: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Default)]
struct Faults {
    connect: Option<WardenError>,
    ping: Option<WardenError>,
    ping_latency: Duration,
    watch: Option<WardenError>,
    next_watch: VecDeque<WardenError>,
}

#[derive(Debug)]
struct Connection {
    state: ConnectionState,
    ever_connected: bool,
}

/// Scripted storage client
///
/// # Examples
///
/// ```
/// use streamwarden_domain::ChangeEvent;
/// use streamwarden_infra::testing::{FeedItem, InMemoryStorage};
///
/// let storage = InMemoryStorage::new();
/// storage.push_event(ChangeEvent::delete("messages", "t1", "m1"));
/// storage.push("messages", FeedItem::End);
/// assert_eq!(storage.watch_calls(), 0);
/// ```
pub struct InMemoryStorage {
    feeds: DashMap<CollectionName, Feed>,
    connection: Mutex<Connection>,
    faults: Mutex<Faults>,
    counters: Arc<Counters>,
    watch_requests: Mutex<Vec<(CollectionName, Option<ResumeToken>)>>,
    notifications: broadcast::Sender<StorageNotification>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            feeds: DashMap::new(),
            connection: Mutex::new(Connection {
                state: ConnectionState::Disconnected,
                ever_connected: false,
            }),
            faults: Mutex::new(Faults::default()),
            counters: Arc::new(Counters::default()),
            watch_requests: Mutex::new(Vec::new()),
            notifications,
        }
    }

    fn feed(&self, collection: &CollectionName) -> Feed {
        self.feeds.entry(collection.clone()).or_insert_with(Feed::new).clone()
    }

    /// Append an item to a collection's feed
    pub fn push(&self, collection: impl Into<CollectionName>, item: FeedItem) {
        let collection = collection.into();
        // The feed keeps its own receiver, so the channel never closes.
        let _ = self.feed(&collection).sender.send(item);
    }

    /// Append an event to the feed of its collection
    pub fn push_event(&self, event: ChangeEvent) {
        let collection = event.collection.clone();
        self.push(collection, FeedItem::Event(event));
    }

    /// Fire a lifecycle notification
    pub fn notify(&self, notification: StorageNotification) {
        let _ = self.notifications.send(notification);
    }

    /// Every `connect` fails with `error` until cleared
    pub fn set_connect_failure(&self, error: Option<WardenError>) {
        self.faults.lock().connect = error;
    }

    /// Every `ping` fails with `error` until cleared
    pub fn set_ping_failure(&self, error: Option<WardenError>) {
        self.faults.lock().ping = error;
    }

    /// Delay before every `ping` answers
    pub fn set_ping_latency(&self, latency: Duration) {
        self.faults.lock().ping_latency = latency;
    }

    /// Every `watch` fails with `error` until cleared
    pub fn set_watch_failure(&self, error: Option<WardenError>) {
        self.faults.lock().watch = error;
    }

    /// Fail only the next `watch`; queued failures apply in order
    pub fn fail_next_watch(&self, error: WardenError) {
        self.faults.lock().next_watch.push_back(error);
    }

    /// Count operations outside the connection lifecycle
    pub fn record_operations(&self, operations: u64, failures: u64) {
        self.counters.operations.fetch_add(operations, Ordering::Relaxed);
        self.counters.failures.fetch_add(failures.min(operations), Ordering::Relaxed);
    }

    pub fn connect_calls(&self) -> u64 {
        self.counters.connect.load(Ordering::Relaxed)
    }

    pub fn disconnect_calls(&self) -> u64 {
        self.counters.disconnect.load(Ordering::Relaxed)
    }

    pub fn ping_calls(&self) -> u64 {
        self.counters.ping.load(Ordering::Relaxed)
    }

    pub fn watch_calls(&self) -> u64 {
        self.counters.watch.load(Ordering::Relaxed)
    }

    /// Subscriptions closed through [`ChangeSubscription::close`]
    pub fn closed_subscriptions(&self) -> u64 {
        self.counters.closed.load(Ordering::Relaxed)
    }

    /// Collection and resume position of every `watch` call, in call order
    pub fn watch_requests(&self) -> Vec<(CollectionName, Option<ResumeToken>)> {
        self.watch_requests.lock().clone()
    }

    /// Resume position of the latest `watch` on `collection`
    pub fn last_resume_token(&self, collection: &str) -> Option<ResumeToken> {
        self.watch_requests
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name.as_str() == collection)
            .and_then(|(_, token)| token.clone())
    }

    fn count_operation(&self, failed: bool) {
        self.counters.operations.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn connect(&self) -> Result<()> {
        self.counters.connect.fetch_add(1, Ordering::Relaxed);
        let failure = self.faults.lock().connect.clone();
        if let Some(err) = failure {
            self.count_operation(true);
            self.notify(StorageNotification::Error { message: err.to_string() });
            return Err(err);
        }
        self.count_operation(false);

        let notification = {
            let mut connection = self.connection.lock();
            if connection.state.is_connected() {
                return Ok(());
            }
            connection.state = ConnectionState::Connected;
            let reconnect = connection.ever_connected;
            connection.ever_connected = true;
            if reconnect {
                StorageNotification::Reconnected
            } else {
                StorageNotification::Connected
            }
        };
        self.notify(notification);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.counters.disconnect.fetch_add(1, Ordering::Relaxed);
        let was_connected = {
            let mut connection = self.connection.lock();
            let was = connection.state.is_connected();
            connection.state = ConnectionState::Disconnected;
            was
        };
        if was_connected {
            self.notify(StorageNotification::Disconnected);
        }
        Ok(())
    }

    async fn watch(
        &self,
        collection: &CollectionName,
        filter: &WatchFilter,
        options: WatchOptions,
    ) -> Result<Box<dyn ChangeSubscription>> {
        self.counters.watch.fetch_add(1, Ordering::Relaxed);
        self.watch_requests.lock().push((collection.clone(), options.resume_after.clone()));

        let failure = {
            let mut faults = self.faults.lock();
            faults.next_watch.pop_front().or_else(|| faults.watch.clone())
        };
        if let Some(err) = failure {
            self.count_operation(true);
            return Err(err);
        }
        self.count_operation(false);

        Ok(Box::new(InMemorySubscription {
            receiver: self.feed(collection).receiver,
            filter: filter.clone(),
            closed: false,
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.counters.ping.fetch_add(1, Ordering::Relaxed);
        let (latency, failure) = {
            let faults = self.faults.lock();
            (faults.ping_latency, faults.ping.clone())
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        if !self.connection_state().is_connected() {
            return Err(WardenError::Network("not connected".to_string()));
        }
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.connection.lock().state
    }

    fn statistics(&self) -> ConnectionStats {
        ConnectionStats {
            operations: self.counters.operations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    fn notifications(&self) -> broadcast::Receiver<StorageNotification> {
        self.notifications.subscribe()
    }
}

struct InMemorySubscription {
    receiver: SharedReceiver,
    filter: WatchFilter,
    closed: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl ChangeSubscription for InMemorySubscription {
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>> {
        if self.closed {
            return None;
        }

        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await? {
                FeedItem::Event(event) if self.filter.matches(event.operation) => {
                    return Some(Ok(event));
                }
                FeedItem::Event(_) => continue,
                FeedItem::Error(err) => return Some(Err(err)),
                FeedItem::End => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// One recorded publish
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub channel: Channel,
    pub event: String,
    pub payload: Value,
}

/// Transport that records publishes instead of sending them
#[derive(Debug, Default)]
pub struct RecordingTransport {
    published: Mutex<Vec<Published>>,
    failing: Mutex<HashSet<Channel>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish to `channel`
    pub fn fail_channel(&self, channel: Channel) {
        self.failing.lock().insert(channel);
    }

    /// Successful publishes, in order
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl RealtimeTransport for RecordingTransport {
    async fn publish(&self, channel: &Channel, event: &str, payload: &Value) -> Result<()> {
        if self.failing.lock().contains(channel) {
            return Err(WardenError::Network(format!("publish to {channel} rejected")));
        }
        self.published.lock().push(Published {
            channel: channel.clone(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Document store answering point lookups
#[derive(Debug, Default)]
pub struct InMemoryLookup {
    documents: DashMap<(CollectionName, DocumentKey), Value>,
}

impl InMemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, key: &str, document: Value) {
        self.documents.insert((CollectionName::new(collection), DocumentKey::new(key)), document);
    }

    pub fn remove(&self, collection: &str, key: &str) -> Option<Value> {
        self.documents
            .remove(&(CollectionName::new(collection), DocumentKey::new(key)))
            .map(|(_, document)| document)
    }
}

#[async_trait]
impl DocumentLookup for InMemoryLookup {
    async fn find_by_id(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> Result<Option<Value>> {
        let entry = self.documents.get(&(collection.clone(), key.clone()));
        Ok(entry.map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use streamwarden_domain::OperationKind;

    use super::*;

    #[tokio::test]
    async fn test_subscription_applies_filter_and_ends() {
        let storage = InMemoryStorage::new();
        storage.push_event(ChangeEvent::insert("messages", "t1", "m1", json!({})));
        storage.push_event(ChangeEvent::delete("messages", "t2", "m1"));
        storage.push("messages", FeedItem::End);

        let filter = WatchFilter { operations: vec![OperationKind::Delete] };
        let mut sub = storage
            .watch(&CollectionName::new("messages"), &filter, WatchOptions::default())
            .await
            .expect("watch");

        let event = sub.next_event().await.expect("item").expect("event");
        assert_eq!(event.resume_token.as_str(), "t2");
        assert!(sub.next_event().await.is_none());

        sub.close().await.expect("close");
        sub.close().await.expect("second close");
        assert_eq!(storage.closed_subscriptions(), 1);
    }

    /// Validates injected faults and lifecycle notifications.
    ///
    /// Assertions:
    /// - A queued watch failure applies once
    /// - The second successful connect reports `Reconnected`
    /// - Pings are not counted as operations
    #[tokio::test]
    async fn test_faults_and_notifications() {
        let storage = InMemoryStorage::new();
        let mut rx = storage.notifications();

        storage.fail_next_watch(WardenError::Network("reset".into()));
        let collection = CollectionName::new("friends");
        let filter = WatchFilter::default();
        assert!(storage.watch(&collection, &filter, WatchOptions::default()).await.is_err());
        assert!(storage.watch(&collection, &filter, WatchOptions::default()).await.is_ok());

        storage.connect().await.expect("connect");
        storage.disconnect().await.expect("disconnect");
        storage.connect().await.expect("reconnect");
        assert_eq!(rx.try_recv().expect("n1"), StorageNotification::Connected);
        assert_eq!(rx.try_recv().expect("n2"), StorageNotification::Disconnected);
        assert_eq!(rx.try_recv().expect("n3"), StorageNotification::Reconnected);

        storage.ping().await.expect("ping");
        assert_eq!(storage.statistics(), ConnectionStats { operations: 4, failures: 1 });
    }

    #[tokio::test]
    async fn test_transport_and_lookup() {
        let transport = RecordingTransport::new();
        transport.fail_channel(Channel::user("x"));
        assert!(transport.publish(&Channel::user("x"), "e", &json!({})).await.is_err());
        transport.publish(&Channel::group("g"), "e", &json!({"n": 1})).await.expect("publish");
        assert_eq!(transport.published().len(), 1);

        let lookup = InMemoryLookup::new();
        lookup.insert("reports", "r1", json!({"neighbourhood": "n1"}));
        let key = DocumentKey::new("r1");
        let found = lookup.find_by_id(&CollectionName::new("reports"), &key).await.expect("ok");
        assert_eq!(found, Some(json!({"neighbourhood": "n1"})));
        lookup.remove("reports", "r1");
        let gone = lookup.find_by_id(&CollectionName::new("reports"), &key).await.expect("ok");
        assert!(gone.is_none());
    }
}
