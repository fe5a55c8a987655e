//! Client-side full mesh of peer connections.
//!
//! [`MeshManager`] keeps one [`PeerConnection`] per remote member of the
//! local member's circle and drives the offer/answer exchange for each
//! independently. The media engine itself (ICE, DTLS, codecs) sits behind
//! the [`PeerConnectionFactory`] trait.
//!
//! # Glare
//!
//! Two members may learn about each other at the same time. The member with
//! the lower id always offers and the other always answers, so the roster
//! sent to a joiner and the `member_joined` seen by existing members never
//! both produce an offer for the same pair.
//!
//! # Flow
//!
//! ```text
//! server frames ──► MeshManager::handle_server_message
//!                        ├── roster / member_joined ──► open link (Offering)
//!                        ├── offer ──► open link (Answering) ──► answer
//!                        ├── answer ──► Connected
//!                        ├── ice_candidate ──► apply or buffer
//!                        └── member_left ──► close link
//! local engine ──► send_local_candidate ──► SignalSink
//! ```

mod error;
mod manager;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use error::{MeshError, MeshResult, NegotiationError, NegotiationResult};
pub use manager::MeshManager;
pub use types::{LinkState, MeshConfig, MeshEvent, SdpKind};

use crate::media::LocalMedia;
use crate::protocol::{ClientMessage, MemberId};

/// One negotiated media connection, as seen by the mesh.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Creates an offer and installs it as the local description.
    async fn create_offer(&self) -> NegotiationResult<String>;

    /// Creates an answer to the applied remote offer and installs it.
    async fn create_answer(&self) -> NegotiationResult<String>;

    /// Applies the remote offer or answer.
    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> NegotiationResult<()>;

    /// Applies one remote network candidate.
    async fn add_ice_candidate(&self, candidate: Value) -> NegotiationResult<()>;

    /// Releases the connection. Must be safe to call in any state.
    async fn close(&self);
}

/// Creates peer connections with the local tracks attached.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Opens a connection towards `remote` carrying `media`.
    async fn create(
        &self,
        remote: &MemberId,
        media: &LocalMedia,
    ) -> NegotiationResult<Box<dyn PeerConnection>>;
}

/// Outbound half of the client's signaling connection.
pub trait SignalSink: Send + Sync {
    /// Queues a frame for the server.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Signal`] if the connection is gone.
    fn send(&self, msg: ClientMessage) -> MeshResult<()>;
}

impl SignalSink for mpsc::UnboundedSender<ClientMessage> {
    fn send(&self, msg: ClientMessage) -> MeshResult<()> {
        mpsc::UnboundedSender::send(self, msg).map_err(|e| MeshError::Signal(e.to_string()))
    }
}
