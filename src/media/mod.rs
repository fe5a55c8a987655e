//! Local camera and microphone capture.
//!
//! One [`LocalMediaController`] per client owns the capture stream. Every
//! peer connection attaches the same [`LocalMedia`] handle, which is
//! read-only for them; mute and camera toggles flip shared flags and never
//! renegotiate.
//!
//! # Lifecycle
//!
//! ```text
//! acquire ──► LocalMedia (shared by all peer links)
//!   ├── set_mute / set_video_enabled (in place)
//!   └── release (exactly once per call, no-op if never acquired)
//! ```

mod controller;
mod error;
pub mod types;

use async_trait::async_trait;

pub use controller::LocalMediaController;
pub use error::{MediaError, MediaResult};
pub use types::{LocalMedia, MediaConfig, TrackKind};

/// Platform capture backend.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Opens camera and/or microphone and returns a stream id.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::PermissionDenied`] if access is refused and
    /// [`MediaError::NoDevice`] if no matching device exists.
    async fn open(&self, config: &MediaConfig) -> MediaResult<String>;

    /// Enables or disables one track of an open stream.
    fn set_enabled(&self, stream_id: &str, kind: TrackKind, enabled: bool);

    /// Stops every track of the stream.
    async fn stop(&self, stream_id: &str);
}
