//! # probe-helper - synthetic round-trip prober
//!
//! The probe helper continuously exercises an event delivery platform end to
//! end. A probe request names a delivery path; the helper performs the one
//! action that should make the platform emit an event (publish a message,
//! touch an object, mutate a pod, forward to a broker...), then waits for the
//! platform to deliver that event back to its receiver. The round trip's
//! outcome is the synchronous answer to the probe request, and the time of
//! the last successful round trip drives a liveness endpoint.
//!
//! ## Core Concepts
//!
//! - **Probe kind**: closed set of delivery paths ([`ProbeKind`])
//! - **Correlation key**: links a probe to the event delivered for it
//!   ([`CorrelationKey`])
//! - **Pending table**: outstanding round trips, at most one per key
//!   ([`PendingTable`])
//! - **Liveness**: healthy iff a round trip succeeded recently
//!   ([`LivenessMonitor`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use probe_helper::{Clients, Event, ProbeHelper, ProbeHelperConfig};
//!
//! # async fn run() -> Result<(), probe_helper::ProbeError> {
//! let helper = Arc::new(ProbeHelper::new(ProbeHelperConfig::default(), Clients::new())?);
//!
//! // A ping source ticking every minute delivers `dev.knative.sources.ping`
//! // events to the receiver, which resolves this probe.
//! let probe = Event::with_random_id("pingsource-probe", "prober").with_extension("period", "1m");
//! helper.handle_probe(probe).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clients;
pub mod config;
pub mod error;
pub mod event;
pub mod probe;
pub mod time;
pub mod transport;

// Re-export primary types at crate root for convenience
pub use clients::Clients;
pub use config::{ProbeHelperConfig, ServerConfig};
pub use error::{ExecutionError, ProbeError, ProbeResult, TransportError, TriggerError, ValidationError};
pub use event::Event;
pub use probe::{
    CorrelationKey, LivenessMonitor, LivenessStatus, PendingTable, ProbeHelper, ProbeKind,
};
