//! # Streamwarden Core
//!
//! Port interfaces and pure rules - no infrastructure dependencies.
//!
//! This crate contains:
//! - The storage-client and change-subscription ports
//! - The real-time transport and point-lookup ports
//! - Audience rules mapping documents to real-time channels
//!
//! ## Architecture Principles
//! - Only depends on `streamwarden-domain`
//! - No driver, socket or runtime code
//! - All external dependencies via traits

pub mod fanout;
pub mod stream;

pub use fanout::{AudienceResolver, AudienceRule, DocumentLookup, RealtimeTransport};
pub use stream::{ChangeSubscription, StorageClient, WatchFilter, WatchOptions};
