//! Error types for the probe helper.
//!
//! Every failure of a probe is terminal to that single invocation and ends up
//! as a NACK. The variants below keep the cause so transports can map it to a
//! status code and logs can name it.

use thiserror::Error;

use crate::probe::CorrelationKey;

/// Validation errors raised before any side effect happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unrecognized probe kind '{kind}'")]
    UnrecognizedKind {
        kind: String,
    },

    #[error("Required extension '{extension}' is missing")]
    MissingExtension {
        extension: String,
    },

    #[error("Extension '{extension}' has invalid value '{value}': {reason}")]
    InvalidExtension {
        extension: String,
        value: String,
        reason: String,
    },

    #[error("Invalid duration '{input}': {reason}")]
    InvalidDuration {
        input: String,
        reason: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Failures of a trigger action against an external subsystem.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("No {collaborator} client is configured")]
    NotConfigured {
        collaborator: &'static str,
    },

    #[error("{collaborator} request failed: {message}")]
    RequestFailed {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} rejected the request with status {status}: {message}")]
    Rejected {
        collaborator: &'static str,
        status: u16,
        message: String,
    },
}

impl TriggerError {
    /// Builds a `RequestFailed` error from any displayable cause.
    #[must_use]
    pub fn request_failed(collaborator: &'static str, err: impl std::fmt::Display) -> Self {
        Self::RequestFailed {
            collaborator,
            message: err.to_string(),
        }
    }
}

/// Errors raised while a probe is being waited on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Probe timed out after {waited_ms}ms waiting for {key}")]
    Timeout {
        key: CorrelationKey,
        waited_ms: u64,
    },

    #[error("A probe for {key} is already in flight")]
    Collision {
        key: CorrelationKey,
    },

    #[error("Probe helper is shutting down")]
    ShuttingDown,
}

/// Codec and transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Malformed event: {message}")]
    MalformedEvent {
        message: String,
    },

    #[error("Failed to serialize event: {message}")]
    SerializationFailed {
        message: String,
    },

    #[error("Payload of {actual} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        actual: usize,
        limit: usize,
    },

    #[error("Listener failed: {message}")]
    Listener {
        message: String,
    },
}

/// Top-level error type for the probe helper.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ProbeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a trigger error.
    #[must_use]
    pub const fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger(_))
    }

    /// Returns true if the probe ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Timeout { .. }))
    }

    /// Returns true if the probe was released by a shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::ShuttingDown))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if re-running the probe later could succeed.
    ///
    /// The helper itself never retries; this is advice for the external
    /// scheduler that invokes it.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Trigger(e) => match e {
                TriggerError::NotConfigured { .. } => false,
                TriggerError::RequestFailed { .. } => true,
                TriggerError::Rejected { status, .. } => *status >= 500,
            },
            Self::Execution(_) => true,
            Self::Transport(e) => matches!(e, TransportError::Listener { .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for probe helper operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
