//! # Streamwarden Domain
//!
//! Domain types shared by every streamwarden crate.
//!
//! This crate contains:
//! - Change-feed types (`ChangeEvent`, `ResumeToken`, `CollectionName`)
//! - Health, recovery and stream signals
//! - Operation classes and degraded outcomes
//! - The domain error type and `Result` alias
//! - Configuration structures and defaults
//!
//! ## Architecture
//! - Depends only on `streamwarden-common` (foundation tier) so the error
//!   type can describe itself to the shared classifier
//! - Pure data; no I/O and no async

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
