//! Change stream supervision
//!
//! - [`ChangeStreamSupervisor`]: lifecycle, listener registration, status
//! - [`ChangeListener`]: consumer interface; [`listener_fn`] adapts closures
//!
//! Reconnects reuse the shared backoff formula and keep each collection's
//! resume token, so delivery continues after the last delivered event.

pub mod listener;
pub mod supervisor;
mod watcher;

pub use listener::{listener_fn, ChangeListener, ListenerId, ListenerRegistry};
pub use supervisor::ChangeStreamSupervisor;
