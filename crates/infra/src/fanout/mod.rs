//! Real-time fan-out

pub mod router;

pub use router::{FanoutRouter, FanoutStats};
