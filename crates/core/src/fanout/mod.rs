//! Real-time fan-out: ports and audience rules

pub mod audience;
pub mod ports;

pub use audience::{AudienceResolver, AudienceRule};
pub use ports::{DocumentLookup, RealtimeTransport};
