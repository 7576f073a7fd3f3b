//! Storage health monitoring

pub mod monitor;

pub use monitor::HealthMonitor;
