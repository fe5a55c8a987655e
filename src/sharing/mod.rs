//! Ephemeral shared state ("position sharing") for circle members.
//!
//! Each member holds at most one entry per circle. Publishing overwrites it,
//! stopping or leaving removes it, and every change is broadcast to the
//! rest of the circle.
//!
//! Payloads are opaque to the server. [`PositionUpdate`] is the typed
//! payload clients use for location sharing: coordinates are rounded to a
//! [`PositionPrecision`] before they leave the device.
//!
//! # Example Usage
//!
//! ```
//! use circle_signal::sharing::{PositionPrecision, PositionUpdate};
//!
//! let update = PositionUpdate::with_precision(37.7749295, -122.4194155, PositionPrecision::Standard)
//!     .unwrap();
//! assert_eq!(update.latitude, 37.7749);
//!
//! let payload = update.to_payload().unwrap();
//! let decoded = PositionUpdate::from_payload(&payload).unwrap();
//! assert_eq!(decoded.geohash, update.geohash);
//! ```

mod broadcaster;
mod error;
pub mod position;

pub use broadcaster::StateBroadcaster;
pub use error::{PositionError, PositionResult};
pub use position::{PositionPrecision, PositionUpdate};
