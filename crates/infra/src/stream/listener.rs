//! Change listeners and their per-collection registry

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use streamwarden_domain::{ChangeEvent, Result};

/// Receives the change events of one or more watched collections
///
/// Returning an error (or panicking) affects only this listener; delivery to
/// the remaining listeners continues.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_change(&self, event: &ChangeEvent) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "listener"
    }
}

/// Handle returned by registration, used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

struct FnListener<F, Fut> {
    name: String,
    callback: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ChangeListener for FnListener<F, Fut>
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_change(&self, event: &ChangeEvent) -> Result<()> {
        (self.callback)(event.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapt an async closure into a [`ChangeListener`]
pub fn listener_fn<F, Fut>(name: impl Into<String>, callback: F) -> Arc<dyn ChangeListener>
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnListener { name: name.into(), callback, _marker: PhantomData })
}

type Entry = (ListenerId, Arc<dyn ChangeListener>);

/// Listeners registered on one collection
///
/// Mutated only by explicit add/remove; dispatch works on a [`snapshot`].
///
/// [`snapshot`]: ListenerRegistry::snapshot
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: RwLock<Vec<Entry>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry").field("listeners", &self.len()).finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    /// `false` if the id was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Registration-ordered copy of the current listeners
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
