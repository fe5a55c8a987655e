//! Error types for local media capture.

use thiserror::Error;

/// Failure to acquire local capture tracks.
///
/// Fatal to starting a call; never retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The user or platform refused camera/microphone access.
    #[error("Media permission denied")]
    PermissionDenied,

    /// No capture device is available.
    #[error("No capture device available")]
    NoDevice,

    /// The configuration requested neither audio nor video.
    #[error("No media tracks requested")]
    NothingRequested,

    /// The device failed for another reason.
    #[error("Capture device error: {0}")]
    Device(String),
}

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;
