//! Specialized data structures
//!
//! - **[`sample_window`]**: Fixed-capacity rolling window of numeric samples
//!   used for latency and error-rate history.

pub mod sample_window;

// Re-export commonly used types
pub use sample_window::SampleWindow;
