//! Local media controller.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::error::{MediaError, MediaResult};
use super::types::{LocalMedia, MediaConfig, TrackKind};
use super::CaptureDevice;

/// Owns the single local capture stream of a client.
///
/// # Example
///
/// ```rust,ignore
/// let controller = LocalMediaController::new(Arc::new(PlatformCamera::new()));
/// let media = controller.acquire(&MediaConfig::default()).await?;
/// controller.set_mute(true);
/// controller.release().await;
/// ```
pub struct LocalMediaController {
    device: Arc<dyn CaptureDevice>,
    /// Serializes acquire and release.
    lifecycle: AsyncMutex<()>,
    current: RwLock<Option<LocalMedia>>,
}

impl LocalMediaController {
    /// Creates a controller over a capture device.
    #[must_use]
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            lifecycle: AsyncMutex::new(()),
            current: RwLock::new(None),
        }
    }

    /// Opens the capture stream, or returns the one already open.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::PermissionDenied`] or [`MediaError::NoDevice`]
    /// as reported by the device, and [`MediaError::NothingRequested`] if
    /// `config` disables both tracks.
    pub async fn acquire(&self, config: &MediaConfig) -> MediaResult<LocalMedia> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(media) = self.current() {
            debug!(stream = media.stream_id(), "Reusing acquired media");
            return Ok(media);
        }
        if !config.audio && !config.video {
            return Err(MediaError::NothingRequested);
        }

        let stream_id = self
            .device
            .open(config)
            .await
            .inspect_err(|e| warn!(error = %e, "Media acquisition failed"))?;
        let media = LocalMedia::new(stream_id, config.clone());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(media.clone());
        info!(
            stream = media.stream_id(),
            audio = config.audio,
            video = config.video,
            "Local media acquired"
        );
        Ok(media)
    }

    /// The acquired stream, if any.
    #[must_use]
    pub fn current(&self) -> Option<LocalMedia> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether a stream is currently acquired.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        self.current().is_some()
    }

    /// Mutes or unmutes the microphone in place.
    ///
    /// Returns `false` if nothing is acquired or there is no audio track.
    pub fn set_mute(&self, muted: bool) -> bool {
        self.toggle(TrackKind::Audio, !muted)
    }

    /// Turns the camera on or off in place.
    ///
    /// Returns `false` if nothing is acquired or there is no video track.
    pub fn set_video_enabled(&self, enabled: bool) -> bool {
        self.toggle(TrackKind::Video, enabled)
    }

    /// Stops all tracks. Safe to call when nothing was acquired.
    ///
    /// Returns `true` if a stream was stopped by this call.
    pub async fn release(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(media) = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        if media.stop() {
            self.device.stop(media.stream_id()).await;
        }
        info!(stream = media.stream_id(), "Local media released");
        true
    }

    fn toggle(&self, kind: TrackKind, enabled: bool) -> bool {
        let Some(media) = self.current() else {
            return false;
        };
        if !media.set_enabled(kind, enabled) {
            return false;
        }
        self.device.set_enabled(media.stream_id(), kind, enabled);
        debug!(stream = media.stream_id(), %kind, enabled, "Track toggled");
        true
    }
}
