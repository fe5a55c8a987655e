//! Addressed relay for session negotiation traffic.
//!
//! Offers, answers and candidates are forwarded to exactly one target
//! member. The relay never parses their payloads, so new negotiation
//! fields need no server upgrade.

mod relay;

pub use relay::{DropReason, RelayOutcome, SignalingRelay};
