//! Types for local media capture.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Capture settings requested from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaConfig {
    /// Capture a microphone track.
    pub audio: bool,
    /// Capture a camera track.
    pub video: bool,
    /// Requested frame width in pixels.
    pub video_width: u32,
    /// Requested frame height in pixels.
    pub video_height: u32,
    /// Requested frames per second.
    pub frame_rate: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            video_width: 1280,
            video_height: 720,
            frame_rate: 30,
        }
    }
}

impl MediaConfig {
    /// Audio and video at 720p30.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Microphone only.
    #[must_use]
    pub fn audio_only() -> Self {
        Self {
            video: false,
            ..Self::default()
        }
    }

    /// Enables or disables the audio track.
    #[must_use]
    pub const fn with_audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }

    /// Enables or disables the video track.
    #[must_use]
    pub const fn with_video(mut self, video: bool) -> Self {
        self.video = video;
        self
    }

    /// Sets the requested resolution.
    #[must_use]
    pub const fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.video_width = width;
        self.video_height = height;
        self
    }

    /// Sets the requested frame rate.
    #[must_use]
    pub const fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }
}

/// Kind of a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone.
    Audio,
    /// Camera.
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug)]
struct Tracks {
    stream_id: String,
    config: MediaConfig,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Shared handle to the acquired capture stream.
///
/// Clones refer to the same tracks. Peer connections read the enablement
/// flags when sending, so toggling them needs no renegotiation.
#[derive(Debug, Clone)]
pub struct LocalMedia {
    tracks: Arc<Tracks>,
}

impl LocalMedia {
    pub(crate) fn new(stream_id: String, config: MediaConfig) -> Self {
        Self {
            tracks: Arc::new(Tracks {
                stream_id,
                audio_enabled: AtomicBool::new(config.audio),
                video_enabled: AtomicBool::new(config.video),
                config,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Device-assigned stream id.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.tracks.stream_id
    }

    /// Settings the stream was opened with.
    #[must_use]
    pub fn config(&self) -> &MediaConfig {
        &self.tracks.config
    }

    /// Whether the stream carries a track of `kind`.
    #[must_use]
    pub fn has_track(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.tracks.config.audio,
            TrackKind::Video => self.tracks.config.video,
        }
    }

    /// Whether the track of `kind` is currently sending.
    #[must_use]
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        self.has_track(kind) && !self.is_stopped() && self.flag(kind).load(Ordering::SeqCst)
    }

    /// Whether the tracks were stopped by a release.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.tracks.stopped.load(Ordering::SeqCst)
    }

    /// Returns `true` if both handles refer to the same stream.
    #[must_use]
    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tracks, &other.tracks)
    }

    pub(crate) fn set_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        if !self.has_track(kind) {
            return false;
        }
        self.flag(kind).store(enabled, Ordering::SeqCst);
        true
    }

    /// Marks the tracks stopped. Returns `false` if they already were.
    pub(crate) fn stop(&self) -> bool {
        !self.tracks.stopped.swap(true, Ordering::SeqCst)
    }

    fn flag(&self, kind: TrackKind) -> &AtomicBool {
        match kind {
            TrackKind::Audio => &self.tracks.audio_enabled,
            TrackKind::Video => &self.tracks.video_enabled,
        }
    }
}
