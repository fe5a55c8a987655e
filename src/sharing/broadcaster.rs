//! Shared-state broadcaster.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::circle::{CircleRegistry, SharedStateEntry};
use crate::protocol::{CircleId, MemberId, ServerMessage};
use crate::transport::Transport;

/// Stores the latest payload per member per circle and fans changes out.
pub struct StateBroadcaster {
    registry: Arc<CircleRegistry>,
    transport: Arc<dyn Transport>,
    ttl: Duration,
}

impl StateBroadcaster {
    /// Creates a broadcaster whose entries expire after `ttl`.
    #[must_use]
    pub fn new(
        registry: Arc<CircleRegistry>,
        transport: Arc<dyn Transport>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            ttl,
        }
    }

    /// Replaces the member's entry and sends `state_shared` to the others.
    ///
    /// Returns `false` (and stores nothing) if the member is not joined to
    /// the circle.
    pub fn publish(&self, circle_id: &CircleId, member: &MemberId, payload: Value) -> bool {
        let transport = self.transport.as_ref();
        let published = self.registry.with_circle(circle_id, |circle| {
            if !circle.contains(member) {
                return false;
            }
            let entry = SharedStateEntry::now(payload);
            let msg = ServerMessage::StateShared {
                circle_id: circle_id.clone(),
                member_id: member.clone(),
                payload: entry.payload.clone(),
                shared_at: entry.shared_at,
            };
            circle.put_shared(member, entry);
            circle.broadcast(transport, Some(member), &msg);
            true
        });
        let published = published.unwrap_or(false);
        if !published {
            debug!(circle = %circle_id, member = %member.short(), "Share from non-member ignored");
        }
        published
    }

    /// Removes the member's entry and sends `state_stopped` to the others.
    ///
    /// Returns `false` if there was no entry; nothing is broadcast then.
    pub fn unpublish(&self, circle_id: &CircleId, member: &MemberId) -> bool {
        let transport = self.transport.as_ref();
        self.registry
            .with_circle(circle_id, |circle| {
                if circle.take_shared(member).is_none() {
                    return false;
                }
                circle.broadcast(
                    transport,
                    Some(member),
                    &ServerMessage::StateStopped {
                        circle_id: circle_id.clone(),
                        member_id: member.clone(),
                    },
                );
                true
            })
            .unwrap_or(false)
    }

    /// Current entry of a member, if any.
    #[must_use]
    pub fn entry(&self, circle_id: &CircleId, member: &MemberId) -> Option<SharedStateEntry> {
        self.registry
            .with_circle(circle_id, |circle| circle.shared(member).cloned())
            .flatten()
    }

    /// Removes entries older than the configured TTL across all circles.
    ///
    /// Each removal is announced with `state_stopped`. Returns the number of
    /// entries removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        // A TTL beyond chrono's range never expires anything.
        let Some(cutoff) = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        else {
            return 0;
        };
        let transport = self.transport.as_ref();
        let mut pruned = 0;
        for circle_id in self.registry.circle_ids() {
            pruned += self
                .registry
                .with_circle(&circle_id, |circle| {
                    let expired = circle.take_shared_older_than(cutoff);
                    for member in &expired {
                        circle.broadcast(
                            transport,
                            Some(member),
                            &ServerMessage::StateStopped {
                                circle_id: circle_id.clone(),
                                member_id: member.clone(),
                            },
                        );
                    }
                    expired.len()
                })
                .unwrap_or(0);
        }
        if pruned > 0 {
            info!(pruned, "Expired shared state removed");
        }
        pruned
    }
}
