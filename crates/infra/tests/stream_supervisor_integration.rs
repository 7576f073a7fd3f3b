//! Integration tests for the change stream supervisor
//!
//! Drives the supervisor against the scripted in-memory storage client.

mod support;

use std::sync::Arc;

use streamwarden_domain::{ChangeEvent, ResumeToken, StreamSignal, StreamStatus, WardenError};
use streamwarden_infra::stream::{listener_fn, ChangeStreamSupervisor};
use streamwarden_infra::testing::{FeedItem, InMemoryStorage};
use support::{eventually, fast_stream_settings, recording_listener, within};

fn supervisor(storage: &Arc<InMemoryStorage>, max_retries: u32) -> ChangeStreamSupervisor {
    let settings = fast_stream_settings(&["messages"], max_retries);
    ChangeStreamSupervisor::new(storage.clone(), settings).expect("valid settings")
}

fn token(token: Option<ResumeToken>) -> Option<String> {
    token.map(|t| t.as_str().to_string())
}

fn status(supervisor: &ChangeStreamSupervisor) -> StreamStatus {
    supervisor.status().collections[0].status
}

/// Validates resumption after a feed error.
///
/// Assertions:
/// - The reconnect resumes after the last delivered token
/// - An event replayed with that token is not delivered twice
/// - Delivery continues in order afterwards
#[tokio::test]
async fn test_reconnect_resumes_without_duplicates() {
    let storage = Arc::new(InMemoryStorage::new());
    let supervisor = supervisor(&storage, 3);
    let (listener, seen) = recording_listener();
    supervisor.add_listener("messages", listener).expect("watched collection");

    storage.push_event(ChangeEvent::delete("messages", "t1", "m1"));
    storage.push_event(ChangeEvent::delete("messages", "t2", "m2"));
    let reset = WardenError::Network("connection reset".into());
    storage.push("messages", FeedItem::Error(reset));
    storage.push_event(ChangeEvent::delete("messages", "t2", "m2"));
    storage.push_event(ChangeEvent::delete("messages", "t3", "m3"));

    supervisor.start().await.expect("start");
    eventually("three deliveries", || seen.lock().len() == 3).await;

    assert_eq!(*seen.lock(), vec!["t1", "t2", "t3"]);
    assert_eq!(storage.watch_calls(), 2);
    assert_eq!(token(storage.last_resume_token("messages")), Some("t2".into()));
    eventually("resume token advanced", || {
        token(supervisor.resume_token("messages")) == Some("t3".into())
    })
    .await;

    supervisor.stop().await.expect("stop");
}

/// Validates the reconnect budget.
///
/// Assertions:
/// - `MaxRetriesExceeded` is signalled once the budget is spent
/// - The collection is halted and no further watch is attempted
/// - `restart_halted` brings it back once storage accepts watches again
#[tokio::test]
async fn test_exhausted_reconnects_halt_until_restarted() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.set_watch_failure(Some(WardenError::Network("connection refused".into())));
    let supervisor = supervisor(&storage, 2);
    let mut signals = supervisor.subscribe_collection("messages").expect("watched");

    supervisor.start().await.expect("start");
    let exhausted = within("max retries signal", async {
        loop {
            match signals.recv().await {
                Ok(StreamSignal::MaxRetriesExceeded { attempts, .. }) => break attempts,
                Ok(_) => continue,
                Err(err) => panic!("signal channel failed: {err}"),
            }
        }
    })
    .await;

    assert_eq!(exhausted, 2);
    assert_eq!(storage.watch_calls(), 3);
    eventually("halted status", || status(&supervisor) == StreamStatus::Halted).await;

    storage.set_watch_failure(None);
    assert_eq!(supervisor.restart_halted(), 1);
    eventually("active status", || status(&supervisor) == StreamStatus::Active).await;
    assert_eq!(supervisor.status().collections[0].reconnect_attempts, 0);

    supervisor.stop().await.expect("stop");
}

/// Validates reconnection after the feed ends on a live connection.
///
/// Assertions:
/// - A natural end of the subscription is signalled as `Ended`
/// - Reconnects follow, and once `max_retries` of them fail a single
///   `MaxRetriesExceeded` is signalled
/// - No watch is attempted after that
#[tokio::test]
async fn test_feed_end_reconnects_until_budget_spent() {
    let storage = Arc::new(InMemoryStorage::new());
    let supervisor = supervisor(&storage, 2);
    let mut signals = supervisor.subscribe_collection("messages").expect("watched");

    supervisor.start().await.expect("start");
    eventually("first watch", || storage.watch_calls() == 1).await;
    eventually("active status", || status(&supervisor) == StreamStatus::Active).await;

    storage.set_watch_failure(Some(WardenError::Network("connection refused".into())));
    storage.push("messages", FeedItem::End);

    let mut ended = 0;
    let attempts = within("max retries signal", async {
        loop {
            match signals.recv().await {
                Ok(StreamSignal::Ended { .. }) => ended += 1,
                Ok(StreamSignal::MaxRetriesExceeded { attempts, .. }) => break attempts,
                Ok(_) => continue,
                Err(err) => panic!("signal channel failed: {err}"),
            }
        }
    })
    .await;

    assert_eq!(ended, 1);
    assert_eq!(attempts, 2);
    eventually("halted status", || status(&supervisor) == StreamStatus::Halted).await;

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(storage.watch_calls(), 3);
    let mut repeated = 0;
    while let Ok(signal) = signals.try_recv() {
        if matches!(signal, StreamSignal::MaxRetriesExceeded { .. }) {
            repeated += 1;
        }
    }
    assert_eq!(repeated, 0);

    supervisor.stop().await.expect("stop");
}

#[tokio::test]
async fn test_fatal_failure_halts_without_retry() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.fail_next_watch(WardenError::Auth("not authorized on chat".into()));
    let supervisor = supervisor(&storage, 5);
    let mut signals = supervisor.subscribe();

    supervisor.start().await.expect("start");
    let reason = within("halted signal", async {
        loop {
            if let Ok(StreamSignal::Halted { reason, .. }) = signals.recv().await {
                break reason;
            }
        }
    })
    .await;

    assert!(!reason.is_empty());
    assert_eq!(status(&supervisor), StreamStatus::Halted);
    assert_eq!(storage.watch_calls(), 1);
    supervisor.stop().await.expect("stop");
}

/// Validates listener isolation.
///
/// Assertions:
/// - A listener that errors does not block later listeners
/// - A listener that panics does not kill the subscription loop
#[tokio::test]
async fn test_failing_listeners_are_isolated() {
    let storage = Arc::new(InMemoryStorage::new());
    let supervisor = supervisor(&storage, 3);

    supervisor
        .add_listener(
            "messages",
            listener_fn("failing", |_event| async {
                Err(WardenError::Internal("listener bug".into()))
            }),
        )
        .expect("add");
    supervisor
        .add_listener(
            "messages",
            listener_fn("panicking", |event: ChangeEvent| async move {
                assert_ne!(event.resume_token.as_str(), "t1", "listener panicked");
                Ok(())
            }),
        )
        .expect("add");
    let (listener, seen) = recording_listener();
    supervisor.add_listener("messages", listener).expect("add");

    storage.push_event(ChangeEvent::delete("messages", "t1", "m1"));
    storage.push_event(ChangeEvent::delete("messages", "t2", "m2"));
    supervisor.start().await.expect("start");

    eventually("both deliveries", || seen.lock().len() == 2).await;
    assert_eq!(status(&supervisor), StreamStatus::Active);
    assert_eq!(storage.watch_calls(), 1);
    supervisor.stop().await.expect("stop");
}

/// Validates stop and restart.
///
/// Assertions:
/// - Stop closes the subscription and keeps the resume token
/// - Start after stop resumes from the kept token
/// - Removed listeners receive nothing further
#[tokio::test]
async fn test_stop_keeps_resume_token() {
    let storage = Arc::new(InMemoryStorage::new());
    let supervisor = supervisor(&storage, 3);
    let (listener, seen) = recording_listener();
    let id = supervisor.add_listener("messages", listener).expect("add");

    storage.push_event(ChangeEvent::delete("messages", "t1", "m1"));
    supervisor.start().await.expect("start");
    eventually("first delivery", || seen.lock().len() == 1).await;

    supervisor.stop().await.expect("stop");
    supervisor.stop().await.expect("second stop");
    assert_eq!(storage.closed_subscriptions(), 1);
    assert_eq!(status(&supervisor), StreamStatus::Stopped);
    assert_eq!(token(supervisor.resume_token("messages")), Some("t1".into()));

    assert!(supervisor.remove_listener("messages", id));
    assert!(!supervisor.remove_listener("messages", id));

    storage.push_event(ChangeEvent::delete("messages", "t2", "m2"));
    supervisor.start().await.expect("restart");
    eventually("resumed watch", || storage.watch_calls() == 2).await;
    eventually("second event consumed", || {
        token(supervisor.resume_token("messages")) == Some("t2".into())
    })
    .await;

    assert_eq!(token(storage.last_resume_token("messages")), Some("t1".into()));
    assert_eq!(*seen.lock(), vec!["t1"]);
    supervisor.stop().await.expect("stop");
}

#[tokio::test]
async fn test_unknown_collection_is_rejected() {
    let storage = Arc::new(InMemoryStorage::new());
    let supervisor = supervisor(&storage, 3);
    let (listener, _) = recording_listener();

    let err = supervisor.add_listener("audit", listener).expect_err("not watched");
    assert!(matches!(err, WardenError::NotFound(_)));
    assert!(supervisor.subscribe_collection("audit").is_none());
}
