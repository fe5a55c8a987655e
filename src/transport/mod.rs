//! Transport contract between the signaling core and client connections.
//!
//! The core never owns sockets. A host (WebSocket server, test harness)
//! registers one outbound channel per connected member and forwards
//! inbound frames to [`SignalingServer`](crate::server::SignalingServer).
//!
//! Delivery guarantees expected from every implementation:
//!
//! - **Fire-and-forget**: `send` never waits for an acknowledgment
//! - **Per-connection FIFO**: frames to one member arrive in send order
//! - **At-most-once**: a send to a member that is gone fails with
//!   [`TransportError::Dropped`] and is not retried

mod channel;
mod error;

pub use channel::ChannelTransport;
pub use error::{TransportError, TransportResult};

use crate::protocol::{MemberId, ServerMessage};

/// Outbound half of the client connections.
pub trait Transport: Send + Sync {
    /// Queues a frame for one member.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Dropped`] if the member has no live connection.
    fn send(&self, to: &MemberId, msg: ServerMessage) -> TransportResult<()>;

    /// Closes the member's connection, if any.
    fn close(&self, member: &MemberId);
}
