//! Error types for shared-state payloads.

use thiserror::Error;

/// Errors raised when building or decoding a position payload.
#[derive(Debug, Error)]
pub enum PositionError {
    /// Latitude or longitude is not finite or out of range.
    #[error("Invalid coordinates: {latitude}, {longitude}")]
    InvalidCoordinates {
        /// Rejected latitude.
        latitude: f64,
        /// Rejected longitude.
        longitude: f64,
    },

    /// Payload is not a position update.
    #[error("Invalid position payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Result type for position operations.
pub type PositionResult<T> = Result<T, PositionError>;
