//! Domain types and models

pub mod change;
pub mod channel;
pub mod health;
pub mod operation;
pub mod recovery;
pub mod stream;

pub use change::{ChangeEvent, CollectionName, DocumentKey, OperationKind, ResumeToken};
pub use channel::Channel;
pub use health::{
    AlertLevel, ConnectionState, ConnectionStats, HealthIssue, HealthReport, HealthSignal,
    HealthSnapshot, StorageNotification,
};
pub use operation::{OperationClass, OperationOutcome, OperationRequest, OutcomeSource};
pub use recovery::{RecoverySignal, RecoveryState};
pub use stream::{CollectionStatus, StreamSignal, StreamStatus, StreamStatusReport};
