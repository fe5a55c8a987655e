//! Circle membership for ephemeral group sessions.
//!
//! A "circle" is a named session holding the set of currently connected
//! members. Circles are created on the first join under an unseen id and
//! removed the moment their last member leaves or disconnects.
//!
//! # Architecture
//!
//! ```text
//! PresenceManager (join / leave / disconnect)
//!     └── CircleRegistry (one lock per circle)
//!             ├── members
//!             └── shared-state entries
//! ```
//!
//! # Types
//!
//! - [`Circle`]: Snapshot of a live circle
//! - [`SharedStateEntry`]: Latest payload a member shared in a circle
//! - [`JoinOutcome`]: Roster returned to a joining member

mod presence;
mod registry;
pub mod types;

pub use presence::PresenceManager;
pub use registry::{CircleEntry, CircleRegistry};
pub use types::{Circle, JoinOutcome, SharedStateEntry};
