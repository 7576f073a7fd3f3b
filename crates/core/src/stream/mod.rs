//! Change stream ports

pub mod ports;

pub use ports::{ChangeSubscription, StorageClient, WatchFilter, WatchOptions};
