//! Wire protocol for circle signaling.
//!
//! Every frame exchanged over a transport connection is a JSON object
//! internally tagged on `"type"`. Field names are camelCase so browser
//! clients can consume them unchanged.
//!
//! # Message Flow
//!
//! ```text
//! client                       server                      other members
//!   │ join_circle ─────────────▶ │                              │
//!   │ ◀──────────── roster       │ member_joined ─────────────▶ │
//!   │ offer{target} ───────────▶ │ offer{from} ──────▶ target only
//!   │ share_state ─────────────▶ │ state_shared ──────────────▶ │
//! ```
//!
//! Negotiation payloads (`sdp`, `candidate`) and shared-state payloads are
//! opaque: the server forwards them verbatim and never inspects them.

mod error;
pub mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use types::{CircleId, ClientMessage, MemberId, Negotiation, NegotiationMessage, ServerMessage};
