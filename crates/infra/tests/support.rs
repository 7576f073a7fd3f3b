//! Shared helpers for the infra integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use streamwarden_domain::{ChangeEvent, StreamSettings};
use streamwarden_infra::stream::{listener_fn, ChangeListener};

const WAIT_LIMIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Stream settings with millisecond backoff for the given collections
pub fn fast_stream_settings(collections: &[&str], max_retries: u32) -> StreamSettings {
    StreamSettings {
        collections: collections.iter().map(|c| (*c).to_string()).collect(),
        max_retries,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        jitter_factor: 0.0,
        ..StreamSettings::default()
    }
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Await `future`; panics after two seconds
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(WAIT_LIMIT, future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// Listener that records the resume token of every event it receives
pub fn recording_listener() -> (Arc<dyn ChangeListener>, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = listener_fn("recorder", move |event: ChangeEvent| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().push(event.resume_token.as_str().to_string());
            Ok(())
        }
    });
    (listener, seen)
}
