//! Error types for the signaling server facade.

use thiserror::Error;

use crate::protocol::{MemberId, ProtocolError};

/// Errors returned while handling client frames.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server has not been started or was stopped.
    #[error("Signaling server is not running")]
    NotRunning,

    /// The sender has no live connection (never connected or already
    /// disconnected).
    #[error("Member is not connected: {0}")]
    NotConnected(MemberId),

    /// A client frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A shared-state payload exceeded the configured limit.
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Serialized size of the rejected payload.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
