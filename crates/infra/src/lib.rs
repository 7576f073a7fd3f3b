//! # Streamwarden Infrastructure
//!
//! Runtime components built on the ports of `streamwarden-core`.
//!
//! This crate contains:
//! - The change stream supervisor and its listener registry
//! - The health monitor
//! - The recovery manager with its degradation cache and write queue
//! - The real-time fan-out router
//! - Configuration loading and tracing setup
//! - Runtime wiring and in-memory adapters for tests
//!
//! ## Architecture
//! - Implements behaviour over traits defined in `streamwarden-core`
//! - Depends on `streamwarden-common` for backoff, retry and circuit breaking
//! - Contains all task-spawning and I/O code

pub mod config;
pub mod fanout;
pub mod health;
pub mod observability;
pub mod recovery;
pub mod runtime;
pub mod stream;
pub mod testing;

// Re-export commonly used items
pub use fanout::{FanoutRouter, FanoutStats};
pub use health::HealthMonitor;
pub use recovery::{RecoveryManager, ReplaySummary};
pub use runtime::WardenRuntime;
pub use stream::{listener_fn, ChangeListener, ChangeStreamSupervisor, ListenerId};
