//! Network surfaces of the probe helper.
//!
//! The HTTP listeners are always available. The gRPC service carrying the
//! same envelopes as JSON bytes is behind the `transport-grpc` feature.

pub mod http;

#[cfg(feature = "transport-grpc")]
pub mod grpc;

pub use http::{probe_router, receiver_router, status_for, HEALTH_PATH};
