//! Error types for the peer mesh.

use thiserror::Error;

use crate::media::MediaError;

/// Failure of one peer negotiation.
///
/// Contained to the affected link: it is closed and reported, every other
/// link keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    /// The engine refused a remote offer or answer.
    #[error("Remote description rejected: {0}")]
    RemoteDescriptionRejected(String),

    /// The engine failed to create a connection or description, or lost
    /// connectivity after negotiation.
    #[error("Peer connection engine error: {0}")]
    Engine(String),

    /// The link stayed in `Offering` or `Answering` too long.
    #[error("Negotiation timed out")]
    TimedOut,

    /// The signaling channel refused an outbound message.
    #[error("Signaling failed: {0}")]
    Signal(String),
}

/// Result type for engine calls.
pub type NegotiationResult<T> = Result<T, NegotiationError>;

/// Errors surfaced by call-level operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Local media could not be acquired; no link was created.
    #[error("Media acquisition failed: {0}")]
    Media(#[from] MediaError),

    /// The signaling channel is gone.
    #[error("Signaling channel closed: {0}")]
    Signal(String),

    /// A call is already active.
    #[error("Already in a call")]
    AlreadyInCall,

    /// No call is active.
    #[error("Not in a call")]
    NotInCall,
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_error_display() {
        assert_eq!(
            NegotiationError::RemoteDescriptionRejected("bad sdp".to_string()).to_string(),
            "Remote description rejected: bad sdp"
        );
        assert_eq!(NegotiationError::TimedOut.to_string(), "Negotiation timed out");
    }

    #[test]
    fn media_error_converts() {
        let err: MeshError = MediaError::NoDevice.into();
        assert!(matches!(err, MeshError::Media(MediaError::NoDevice)));
        assert_eq!(
            err.to_string(),
            "Media acquisition failed: No capture device available"
        );
    }
}
