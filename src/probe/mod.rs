//! Probe round trips: kinds, correlation, waiting and liveness.

pub mod helper;
pub mod key;
pub mod kind;
pub mod liveness;
pub mod pending;
pub mod receiver;
pub mod registry;

pub use helper::ProbeHelper;
pub use key::CorrelationKey;
pub use kind::{ApiServerPhase, ProbeKind, StoragePhase};
pub use liveness::{LivenessMonitor, LivenessStatus};
pub use pending::{PendingTable, WaitOutcome, Waiter};
pub use receiver::correlation_key_for_delivered;
pub use registry::{Admission, DeadlinePolicy, DispatchRegistry, PodTarget, Probe};
