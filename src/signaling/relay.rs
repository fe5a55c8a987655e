//! Signaling relay implementation.

use std::sync::Arc;

use tracing::debug;

use crate::circle::CircleRegistry;
use crate::protocol::{CircleId, MemberId, NegotiationMessage};
use crate::transport::{Transport, TransportError};

/// Why a negotiation message was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Source and target share no circle (or not the named one).
    NotInSameCircle,
    /// Target is a member but its connection is gone.
    TargetDisconnected,
    /// Source addressed itself.
    SelfAddressed,
}

/// Result of one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Forwarded once to the target within this circle.
    Delivered { circle_id: CircleId },
    /// Silently discarded.
    Dropped { reason: DropReason },
}

impl RelayOutcome {
    /// Returns whether the message reached the target's connection.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Forwards negotiation messages between members of the same circle.
///
/// Delivery is at-most-once. A sender whose target has gone will learn
/// about it through `member_left`, not through a relay error.
pub struct SignalingRelay {
    registry: Arc<CircleRegistry>,
    transport: Arc<dyn Transport>,
}

impl SignalingRelay {
    /// Creates a relay.
    #[must_use]
    pub fn new(registry: Arc<CircleRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Forwards `msg` to its target.
    ///
    /// If the message names a circle, both members must belong to it.
    /// Otherwise the first circle (in id order) shared by source and target
    /// is used. The send happens under that circle's lock, so a target that
    /// has already been announced as left never receives it.
    pub fn relay(&self, msg: NegotiationMessage) -> RelayOutcome {
        if msg.source == msg.target {
            return Self::dropped(&msg, DropReason::SelfAddressed);
        }

        let candidates = msg.circle_id.clone().map_or_else(
            || self.registry.circles_of(&msg.source),
            |circle_id| vec![circle_id],
        );

        let mut pending = Some(msg);
        for circle_id in candidates {
            let outcome = self.registry.with_circle(&circle_id, |circle| {
                let shared = pending
                    .as_ref()
                    .is_some_and(|m| circle.contains(&m.source) && circle.contains(&m.target));
                if !shared {
                    return None;
                }
                let msg = pending.take()?;
                let target = msg.target.clone();
                let msg_type = msg.body.msg_type();
                let outcome = match self
                    .transport
                    .send(&target, msg.into_delivery(circle_id.clone()))
                {
                    Ok(()) => RelayOutcome::Delivered {
                        circle_id: circle_id.clone(),
                    },
                    Err(TransportError::Dropped(_) | TransportError::Closed) => {
                        RelayOutcome::Dropped {
                            reason: DropReason::TargetDisconnected,
                        }
                    }
                };
                debug!(
                    circle = %circle_id,
                    target = %target.short(),
                    msg_type,
                    delivered = outcome.is_delivered(),
                    "Relayed negotiation message"
                );
                Some(outcome)
            });
            if let Some(Some(outcome)) = outcome {
                return outcome;
            }
        }

        pending.map_or(
            RelayOutcome::Dropped {
                reason: DropReason::NotInSameCircle,
            },
            |msg| Self::dropped(&msg, DropReason::NotInSameCircle),
        )
    }

    fn dropped(msg: &NegotiationMessage, reason: DropReason) -> RelayOutcome {
        debug!(
            source = %msg.source.short(),
            target = %msg.target.short(),
            msg_type = msg.body.msg_type(),
            ?reason,
            "Dropped negotiation message"
        );
        RelayOutcome::Dropped { reason }
    }
}
