//! Server facade tying presence, relay and sharing together.
//!
//! # Architecture
//!
//! ```text
//! host socket ──frame──► SignalingServer::handle_frame
//!                             ├── join/leave ──► PresenceManager
//!                             ├── offer/answer/ice_candidate ──► SignalingRelay
//!                             └── share_state/stop_sharing ──► StateBroadcaster
//!                                          │
//!                                          ▼
//!                                   Transport::send ──► member sockets
//! ```
//!
//! The host owns the sockets. For every accepted connection it allocates an
//! id with [`SignalingServer::accept`], registers the outbound side with its
//! transport, calls [`SignalingServer::connect`], forwards inbound frames to
//! [`SignalingServer::handle_frame`] and calls
//! [`SignalingServer::disconnect`] when the socket closes.

mod error;
mod manager;
pub mod types;

pub use error::{ServerError, ServerResult};
pub use manager::SignalingServer;
pub use types::ServerConfig;
