//! Error types for transport delivery.

use thiserror::Error;

use crate::protocol::MemberId;

/// Errors that can occur when handing a frame to a connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Target has no live connection. Non-fatal; the frame is discarded.
    #[error("Target not connected: {0}")]
    Dropped(MemberId),

    /// The transport itself has shut down.
    #[error("Transport closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_error_display() {
        let err = TransportError::Dropped(MemberId::from("bob"));
        assert_eq!(err.to_string(), "Target not connected: bob");
    }

    #[test]
    fn closed_error_display() {
        assert_eq!(TransportError::Closed.to_string(), "Transport closed");
    }
}
