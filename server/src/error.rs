//! Relay-level error taxonomy

use thiserror::Error;

/// Faults handled at the relay boundary. None of these propagate past the
/// connection that caused them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("an orchestrator is already connected")]
    DuplicateOrchestrator,

    #[error("no live connection for device {0}")]
    UnknownDevice(String),

    #[error("malformed submission: {0}")]
    MalformedSubmission(String),

    #[error("no device connected with number {0}")]
    UnknownOrdinal(u64),

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),
}
