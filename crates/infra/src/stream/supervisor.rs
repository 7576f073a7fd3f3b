//! Change stream supervisor
//!
//! Owns one [`WatchedCollection`] per configured collection and one
//! subscription task per collection while running. Signals are published on
//! a generic channel and on a per-collection channel.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use streamwarden_domain::{Result, StreamSettings};
//! use streamwarden_infra::stream::{listener_fn, ChangeStreamSupervisor};
//! use streamwarden_infra::testing::InMemoryStorage;
//!
//! # async fn example() -> Result<()> {
//! let storage = Arc::new(InMemoryStorage::new());
//! let supervisor = ChangeStreamSupervisor::new(storage, StreamSettings::default())?;
//!
//! supervisor.add_listener("messages", listener_fn("log", |event| async move {
//!     tracing::info!(event = %event.event_name(), "change");
//!     Ok(())
//! }))?;
//!
//! supervisor.start().await?;
//! // ... do work ...
//! supervisor.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use streamwarden_common::resilience::{BackoffPolicy, JitterSource};
use streamwarden_core::StorageClient;
use streamwarden_domain::{
    CollectionName, Result, ResumeToken, StreamSettings, StreamSignal, StreamStatus,
    StreamStatusReport, WardenError,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::listener::{ChangeListener, ListenerId};
use super::watcher::{ReconnectPolicy, WatchContext, WatchedCollection};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct RunState {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Supervises the change feeds of every watched collection
pub struct ChangeStreamSupervisor {
    storage: Arc<dyn StorageClient>,
    settings: StreamSettings,
    collections: Vec<Arc<WatchedCollection>>,
    index: HashMap<CollectionName, usize>,
    signals: broadcast::Sender<StreamSignal>,
    jitter: Arc<JitterSource>,
    run: Mutex<Option<RunState>>,
}

impl ChangeStreamSupervisor {
    /// Register every configured collection
    ///
    /// # Errors
    /// Returns `WardenError::Config` for duplicate collection names.
    pub fn new(storage: Arc<dyn StorageClient>, settings: StreamSettings) -> Result<Self> {
        let mut collections = Vec::with_capacity(settings.collections.len());
        let mut index = HashMap::with_capacity(settings.collections.len());

        for raw in &settings.collections {
            let name = CollectionName::new(raw.trim());
            if index.insert(name.clone(), collections.len()).is_some() {
                return Err(WardenError::Config(format!(
                    "stream.collections: '{name}' is listed twice"
                )));
            }
            collections.push(Arc::new(WatchedCollection::new(name, settings.signal_buffer)));
        }

        let (signals, _) = broadcast::channel(settings.signal_buffer.max(1));

        Ok(Self {
            storage,
            settings,
            collections,
            index,
            signals,
            jitter: Arc::new(JitterSource::from_entropy()),
            run: Mutex::new(None),
        })
    }

    /// Use a specific jitter source for reconnect delays
    pub fn with_jitter(mut self, jitter: JitterSource) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    fn collection(&self, name: &str) -> Result<&Arc<WatchedCollection>> {
        self.index
            .get(name)
            .and_then(|&i| self.collections.get(i))
            .ok_or_else(|| WardenError::NotFound(format!("collection '{name}' is not watched")))
    }

    fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.settings.max_retries,
            backoff: BackoffPolicy::new(
                self.settings.initial_delay(),
                self.settings.max_delay(),
                self.settings.jitter_factor,
            ),
            jitter: Arc::clone(&self.jitter),
        }
    }

    fn spawn_watch(
        &self,
        collection: &Arc<WatchedCollection>,
        cancel: &CancellationToken,
    ) -> JoinHandle<()> {
        let context = WatchContext {
            storage: Arc::clone(&self.storage),
            collection: Arc::clone(collection),
            generic: self.signals.clone(),
            policy: self.policy(),
            cancel: cancel.child_token(),
        };
        tokio::spawn(context.run())
    }

    /// Open a subscription per collection, resuming from stored tokens
    ///
    /// Calling `start` while running is a no-op.
    #[instrument(skip(self), fields(collections = self.collections.len()))]
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock();
        if run.is_some() {
            info!("Change stream supervisor already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handles = self
            .collections
            .iter()
            .map(|collection| {
                collection.reset_attempts();
                self.spawn_watch(collection, &cancel)
            })
            .collect();

        *run = Some(RunState { cancel, handles });
        info!("Change stream supervisor started");
        Ok(())
    }

    /// Close every subscription and cancel pending reconnects
    ///
    /// Resume tokens are kept, so a later [`start`](Self::start) resumes
    /// where delivery stopped. Idempotent.
    ///
    /// # Errors
    /// Returns `WardenError::Internal` if a task does not stop within 5s.
    pub async fn stop(&self) -> Result<()> {
        let Some(run) = self.run.lock().take() else {
            return Ok(());
        };

        run.cancel.cancel();
        let mut result = Ok(());
        for handle in run.handles {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    result = Err(WardenError::Internal(format!("Watch task join failed: {err}")));
                }
                Err(_) => {
                    result = Err(WardenError::Internal("Watch task shutdown timeout".to_string()));
                }
            }
        }

        for collection in &self.collections {
            collection.set_status(StreamStatus::Stopped);
        }
        info!("Change stream supervisor stopped");
        result
    }

    /// Restart collections halted by reconnect exhaustion or a fatal error
    ///
    /// Returns how many were restarted; zero while the supervisor is stopped.
    pub fn restart_halted(&self) -> usize {
        let mut run = self.run.lock();
        let Some(run) = run.as_mut() else {
            return 0;
        };

        run.handles.retain(|handle| !handle.is_finished());

        let mut restarted = 0;
        for collection in &self.collections {
            if collection.status() == StreamStatus::Halted {
                collection.reset_attempts();
                collection.set_status(StreamStatus::Connecting);
                run.handles.push(self.spawn_watch(collection, &run.cancel));
                restarted += 1;
            }
        }

        if restarted > 0 {
            info!(restarted, "Restarted halted change streams");
        }
        restarted
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Register a listener on one collection
    ///
    /// # Errors
    /// Returns `WardenError::NotFound` if the collection is not watched.
    pub fn add_listener(
        &self,
        collection: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<ListenerId> {
        Ok(self.collection(collection)?.listeners.add(listener))
    }

    /// Register a listener on every watched collection
    pub fn add_listener_all(
        &self,
        listener: Arc<dyn ChangeListener>,
    ) -> Vec<(CollectionName, ListenerId)> {
        self.collections
            .iter()
            .map(|c| (c.name.clone(), c.listeners.add(Arc::clone(&listener))))
            .collect()
    }

    /// `false` if the collection or the listener is unknown
    pub fn remove_listener(&self, collection: &str, id: ListenerId) -> bool {
        match self.collection(collection) {
            Ok(c) => c.listeners.remove(id),
            Err(_) => {
                warn!(collection, %id, "remove_listener on unwatched collection");
                false
            }
        }
    }

    pub fn status(&self) -> StreamStatusReport {
        StreamStatusReport {
            running: self.is_running(),
            storage_connected: self.storage.connection_state().is_connected(),
            collections: self.collections.iter().map(|c| c.report()).collect(),
        }
    }

    /// Signals of every collection
    pub fn subscribe(&self) -> broadcast::Receiver<StreamSignal> {
        self.signals.subscribe()
    }

    /// Signals of one collection
    pub fn subscribe_collection(
        &self,
        collection: &str,
    ) -> Option<broadcast::Receiver<StreamSignal>> {
        self.collection(collection).ok().map(|c| c.subscribe())
    }

    /// Last delivered position of a collection
    pub fn resume_token(&self, collection: &str) -> Option<ResumeToken> {
        self.collection(collection).ok().and_then(|c| c.resume_token())
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionName> {
        self.collections.iter().map(|c| &c.name)
    }
}
