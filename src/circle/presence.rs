//! Join, leave and disconnect handling.
//!
//! All notifications for a circle are sent while that circle's lock is
//! held, so every member observes membership changes of one circle in the
//! same order.

use std::sync::Arc;

use tracing::{debug, info};

use super::registry::CircleRegistry;
use super::types::JoinOutcome;
use crate::protocol::{CircleId, MemberId, ServerMessage};
use crate::transport::Transport;

/// Presence manager built on the [`CircleRegistry`].
///
/// None of its operations can fail: joins are idempotent and leaves of
/// unknown members are silently ignored.
pub struct PresenceManager {
    registry: Arc<CircleRegistry>,
    transport: Arc<dyn Transport>,
}

impl PresenceManager {
    /// Creates a presence manager.
    #[must_use]
    pub fn new(registry: Arc<CircleRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Adds `member` to the circle.
    ///
    /// On a fresh join every other member receives `member_joined`, and the
    /// joiner receives a `roster` of the others followed by one
    /// `state_shared` per live shared-state entry. Re-joining an
    /// already-present member sends nothing.
    pub fn join(&self, circle_id: &CircleId, member: &MemberId) -> JoinOutcome {
        let transport = self.transport.as_ref();
        self.registry.with_circle_or_create(circle_id, |circle| {
            if !circle.add_member(member) {
                debug!(circle = %circle_id, member = %member.short(), "Duplicate join ignored");
                return JoinOutcome {
                    circle_id: circle_id.clone(),
                    joined: false,
                    roster: circle.members(),
                };
            }

            let notified = circle.broadcast(
                transport,
                Some(member),
                &ServerMessage::MemberJoined {
                    circle_id: circle_id.clone(),
                    member_id: member.clone(),
                },
            );

            let roster = circle.members();
            let others: Vec<MemberId> = roster.iter().filter(|m| *m != member).cloned().collect();
            let mut catch_up = vec![ServerMessage::Roster {
                circle_id: circle_id.clone(),
                members: others,
            }];
            catch_up.extend(circle.shared_entries().into_iter().map(|(owner, entry)| {
                ServerMessage::StateShared {
                    circle_id: circle_id.clone(),
                    member_id: owner,
                    payload: entry.payload,
                    shared_at: entry.shared_at,
                }
            }));
            for msg in catch_up {
                if transport.send(member, msg).is_err() {
                    debug!(member = %member.short(), "Joiner disconnected during catch-up");
                    break;
                }
            }

            info!(
                circle = %circle_id,
                member = %member.short(),
                members = roster.len(),
                notified,
                "Member joined"
            );
            JoinOutcome {
                circle_id: circle_id.clone(),
                joined: true,
                roster,
            }
        })
    }

    /// Removes `member` from the circle.
    ///
    /// Remaining members receive `state_stopped` (if the member was sharing)
    /// and then `member_left`. The circle is deleted once empty. Returns
    /// `false` if the member was not joined.
    pub fn leave(&self, circle_id: &CircleId, member: &MemberId) -> bool {
        let transport = self.transport.as_ref();
        let left = self.registry.with_circle(circle_id, |circle| {
            if !circle.remove_member(member) {
                return false;
            }
            if circle.take_shared(member).is_some() {
                circle.broadcast(
                    transport,
                    None,
                    &ServerMessage::StateStopped {
                        circle_id: circle_id.clone(),
                        member_id: member.clone(),
                    },
                );
            }
            circle.broadcast(
                transport,
                None,
                &ServerMessage::MemberLeft {
                    circle_id: circle_id.clone(),
                    member_id: member.clone(),
                },
            );
            info!(circle = %circle_id, member = %member.short(), "Member left");
            true
        });
        left.unwrap_or(false)
    }

    /// Leaves every circle the member belongs to.
    ///
    /// Call once per transport disconnect. Returns the circles that were
    /// left; each of them has emitted exactly one `member_left`.
    pub fn handle_disconnect(&self, member: &MemberId) -> Vec<CircleId> {
        let left: Vec<CircleId> = self
            .registry
            .circles_of(member)
            .into_iter()
            .filter(|circle_id| self.leave(circle_id, member))
            .collect();
        debug!(member = %member.short(), circles = left.len(), "Disconnect handled");
        left
    }
}
