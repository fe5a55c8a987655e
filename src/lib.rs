//! Circle Signal
//!
//! Signaling core for ephemeral group calls: a server-side registry of who
//! belongs to which circle, an addressed relay for session negotiation
//! traffic, a broadcast channel for shared state such as positions, and the
//! client-side mesh manager that turns those messages into one peer
//! connection per remote member.
//!
//! # Architecture
//!
//! ```text
//! server                                  client
//! ──────                                  ──────
//! SignalingServer                         MeshManager
//!   ├── PresenceManager ─┐                  ├── LocalMediaController
//!   ├── SignalingRelay ──┼── CircleRegistry └── PeerConnectionFactory
//!   └── StateBroadcaster ┘
//!             │                                  ▲
//!             └────────── Transport ─────────────┘
//! ```
//!
//! The crate never opens sockets or touches media hardware. Hosts plug in a
//! [`transport::Transport`], a [`media::CaptureDevice`] and a
//! [`mesh::PeerConnectionFactory`]. Logging goes through `tracing`; no
//! subscriber is installed here.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

mod duration_secs;

pub mod circle;
pub mod media;
pub mod mesh;
pub mod protocol;
pub mod server;
pub mod sharing;
pub mod signaling;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use protocol::{CircleId, MemberId};
pub use server::SignalingServer;
