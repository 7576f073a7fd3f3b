//! Observability wiring
//!
//! Components log through `tracing`; this module only installs the global
//! subscriber.

pub mod logging;

pub use logging::{build_filter, init_tracing};
