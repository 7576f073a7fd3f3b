//! One watched collection and its subscription loop
//!
//! The loop owns the collection's only live subscription handle. It walks
//! `connecting → active → (error | ended) → reconnecting → connecting` until
//! it is cancelled, exhausts its reconnect budget, or hits a fatal failure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use streamwarden_common::error::classify;
use streamwarden_common::resilience::{BackoffPolicy, JitterSource};
use streamwarden_core::{ChangeSubscription, StorageClient, WatchFilter, WatchOptions};
use streamwarden_domain::{
    ChangeEvent, CollectionName, CollectionStatus, ResumeToken, StreamSignal, StreamStatus,
    WardenError,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::listener::ListenerRegistry;

#[derive(Debug)]
struct WatchState {
    status: StreamStatus,
    resume_token: Option<ResumeToken>,
    reconnect_attempts: u32,
    events_delivered: u64,
}

/// Registry entry for one collection
#[derive(Debug)]
pub(crate) struct WatchedCollection {
    pub(crate) name: CollectionName,
    pub(crate) listeners: ListenerRegistry,
    state: Mutex<WatchState>,
    signals: broadcast::Sender<StreamSignal>,
}

impl WatchedCollection {
    pub(crate) fn new(name: CollectionName, signal_buffer: usize) -> Self {
        let (signals, _) = broadcast::channel(signal_buffer.max(1));
        Self {
            name,
            listeners: ListenerRegistry::new(),
            state: Mutex::new(WatchState {
                status: StreamStatus::Stopped,
                resume_token: None,
                reconnect_attempts: 0,
                events_delivered: 0,
            }),
            signals,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StreamSignal> {
        self.signals.subscribe()
    }

    pub(crate) fn status(&self) -> StreamStatus {
        self.state.lock().status
    }

    pub(crate) fn set_status(&self, status: StreamStatus) {
        self.state.lock().status = status;
    }

    pub(crate) fn resume_token(&self) -> Option<ResumeToken> {
        self.state.lock().resume_token.clone()
    }

    pub(crate) fn reset_attempts(&self) {
        self.state.lock().reconnect_attempts = 0;
    }

    pub(crate) fn report(&self) -> CollectionStatus {
        let state = self.state.lock();
        CollectionStatus {
            name: self.name.clone(),
            status: state.status,
            resume_token: state.resume_token.clone(),
            reconnect_attempts: state.reconnect_attempts,
            listeners: self.listeners.len(),
            events_delivered: state.events_delivered,
        }
    }
}

/// Reconnect parameters shared by every collection loop
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    pub(crate) max_retries: u32,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) jitter: Arc<JitterSource>,
}

/// Everything a collection loop needs
pub(crate) struct WatchContext {
    pub(crate) storage: Arc<dyn StorageClient>,
    pub(crate) collection: Arc<WatchedCollection>,
    pub(crate) generic: broadcast::Sender<StreamSignal>,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) cancel: CancellationToken,
}

enum FeedOutcome {
    Cancelled,
    Failed(WardenError),
    Ended,
}

enum Next {
    Reconnect,
    Finish,
}

impl WatchContext {
    fn emit(&self, signal: StreamSignal) {
        // Signals are advisory; no receivers is fine.
        let _ = self.collection.signals.send(signal.clone());
        let _ = self.generic.send(signal);
    }

    fn name(&self) -> &CollectionName {
        &self.collection.name
    }

    /// Subscription loop; returns once stopped, halted or exhausted
    pub(crate) async fn run(self) {
        let filter = WatchFilter::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.collection.set_status(StreamStatus::Connecting);
            let resume_after = self.collection.resume_token();
            let resumed = resume_after.is_some();

            let options = WatchOptions { resume_after };
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                opened = self.storage.watch(self.name(), &filter, options) => opened,
            };

            let failure = match opened {
                Ok(subscription) => {
                    {
                        let mut state = self.collection.state.lock();
                        state.reconnect_attempts = 0;
                        state.status = StreamStatus::Active;
                    }
                    info!(collection = %self.name(), resumed, "Change stream active");
                    self.emit(StreamSignal::Connected { collection: self.name().clone(), resumed });

                    match self.pump(subscription).await {
                        FeedOutcome::Cancelled => break,
                        FeedOutcome::Ended => {
                            warn!(collection = %self.name(), "Change stream ended unexpectedly");
                            self.emit(StreamSignal::Ended { collection: self.name().clone() });
                            None
                        }
                        FeedOutcome::Failed(err) => Some(err),
                    }
                }
                Err(err) => Some(err),
            };

            if let Some(err) = failure {
                if let Next::Finish = self.handle_failure(&err) {
                    return;
                }
            }

            match self.schedule_reconnect() {
                Some(delay) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => return,
            }
        }

        self.collection.set_status(StreamStatus::Stopped);
        debug!(collection = %self.name(), "Change stream stopped");
        self.emit(StreamSignal::Stopped { collection: self.name().clone() });
    }

    /// Drain the subscription until it fails, ends, or the loop is cancelled.
    /// The handle is always closed before returning.
    async fn pump(&self, mut subscription: Box<dyn ChangeSubscription>) -> FeedOutcome {
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break FeedOutcome::Cancelled,
                next = subscription.next_event() => next,
            };

            match next {
                Some(Ok(event)) => self.deliver(event).await,
                Some(Err(err)) => break FeedOutcome::Failed(err),
                None => break FeedOutcome::Ended,
            }
        };

        if let Err(err) = subscription.close().await {
            debug!(collection = %self.name(), error = %err, "Closing subscription failed");
        }
        outcome
    }

    async fn deliver(&self, event: ChangeEvent) {
        if self.collection.resume_token().as_ref() == Some(&event.resume_token) {
            debug!(
                collection = %self.name(),
                token = %event.resume_token,
                "Skipping already delivered event"
            );
            return;
        }

        self.emit(StreamSignal::Change(event.clone()));

        for (id, listener) in self.collection.listeners.snapshot() {
            let dispatch = AssertUnwindSafe(listener.on_change(&event)).catch_unwind();
            match dispatch.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    collection = %self.name(),
                    listener = %listener.name(),
                    %id,
                    error = %err,
                    "Change listener failed"
                ),
                Err(_) => error!(
                    collection = %self.name(),
                    listener = %listener.name(),
                    %id,
                    "Change listener panicked"
                ),
            }
        }

        let mut state = self.collection.state.lock();
        state.resume_token = Some(event.resume_token);
        state.events_delivered += 1;
    }

    fn handle_failure(&self, err: &WardenError) -> Next {
        let verdict = classify(err);
        self.emit(StreamSignal::Error {
            collection: self.name().clone(),
            message: err.to_string(),
        });

        if verdict.is_fatal() {
            self.collection.set_status(StreamStatus::Halted);
            error!(
                collection = %self.name(),
                reason = %verdict.reason,
                "Fatal change stream failure, halting"
            );
            self.emit(StreamSignal::Halted {
                collection: self.name().clone(),
                reason: verdict.reason,
            });
            return Next::Finish;
        }

        warn!(
            collection = %self.name(),
            kind = %verdict.kind,
            error = %err,
            "Change stream failed"
        );
        Next::Reconnect
    }

    /// Bump the attempt counter; `None` once the budget is spent
    fn schedule_reconnect(&self) -> Option<Duration> {
        let attempt = {
            let mut state = self.collection.state.lock();
            state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
            if state.reconnect_attempts > self.policy.max_retries {
                state.status = StreamStatus::Halted;
                None
            } else {
                state.status = StreamStatus::Reconnecting;
                Some(state.reconnect_attempts)
            }
        };

        let Some(attempt) = attempt else {
            error!(
                collection = %self.name(),
                max_retries = self.policy.max_retries,
                "max_retries_exceeded: change stream halted, manual restart required"
            );
            self.emit(StreamSignal::MaxRetriesExceeded {
                collection: self.name().clone(),
                attempts: self.policy.max_retries,
            });
            return None;
        };

        let delay = self.policy.backoff.delay_for(attempt, &self.policy.jitter);
        info!(
            collection = %self.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting change stream"
        );
        self.emit(StreamSignal::Reconnecting { collection: self.name().clone(), attempt, delay });
        Some(delay)
    }
}
