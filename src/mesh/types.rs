//! Types for the peer mesh.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::NegotiationError;
use crate::media::MediaError;
use crate::protocol::MemberId;

/// Default time a link may spend negotiating.
const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on candidates held before a remote description is set.
const DEFAULT_MAX_BUFFERED_CANDIDATES: usize = 64;

/// Negotiation state of one peer link.
///
/// ```text
/// Idle ──► Offering ──┐
///   └────► Answering ─┴──► Connected ──► Closed
/// ```
///
/// Any state may move to `Closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Created, nothing sent yet.
    Idle,
    /// Local offer sent, waiting for the answer.
    Offering,
    /// Remote offer received, answer being produced.
    Answering,
    /// Descriptions exchanged.
    Connected,
    /// Torn down.
    Closed,
}

impl LinkState {
    /// Returns whether an offer/answer exchange is in progress.
    #[must_use]
    pub const fn is_negotiating(self) -> bool {
        matches!(self, Self::Offering | Self::Answering)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Offering => write!(f, "offering"),
            Self::Answering => write!(f, "answering"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Which side produced a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    /// An offer.
    Offer,
    /// An answer.
    Answer,
}

/// Mesh tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshConfig {
    /// Time a link may stay in `Offering`/`Answering` (seconds on the wire).
    #[serde(with = "crate::duration_secs")]
    pub negotiation_timeout: Duration,
    /// Candidates kept per remote before the oldest are dropped.
    pub max_buffered_candidates: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            max_buffered_candidates: DEFAULT_MAX_BUFFERED_CANDIDATES,
        }
    }
}

impl MeshConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the negotiation timeout.
    #[must_use]
    pub const fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Sets the per-remote candidate buffer size.
    #[must_use]
    pub const fn with_max_buffered_candidates(mut self, max: usize) -> Self {
        self.max_buffered_candidates = max;
        self
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A link changed state.
    PeerStateChanged {
        /// Remote member.
        remote: MemberId,
        /// New state.
        state: LinkState,
    },
    /// A link was closed because the remote left or the call ended.
    PeerRemoved {
        /// Remote member.
        remote: MemberId,
    },
    /// A link failed and was closed; other links are unaffected.
    PeerFailed {
        /// Remote member.
        remote: MemberId,
        /// Cause.
        error: NegotiationError,
    },
    /// Starting the call failed before any link was created.
    CallFailed {
        /// Cause.
        error: MediaError,
    },
}
