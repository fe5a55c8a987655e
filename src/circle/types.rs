//! Core types for circle membership.
//!
//! A circle is an ephemeral session: it exists only while at least one
//! member is joined and nothing about it outlives the process.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::protocol::{CircleId, MemberId};

/// Snapshot of a circle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circle {
    /// Opaque circle identifier.
    pub id: CircleId,
    /// Currently joined members. Never empty for a live circle.
    pub members: BTreeSet<MemberId>,
    /// When the first member joined.
    pub created_at: DateTime<Utc>,
}

impl Circle {
    /// Number of joined members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Latest shared-state payload published by one member of a circle.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedStateEntry {
    /// Opaque payload, forwarded verbatim.
    pub payload: Value,
    /// When the payload was published.
    pub shared_at: DateTime<Utc>,
}

impl SharedStateEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn now(payload: Value) -> Self {
        Self {
            payload,
            shared_at: Utc::now(),
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Circle that was joined.
    pub circle_id: CircleId,
    /// `false` if the member was already present (idempotent re-join).
    pub joined: bool,
    /// Resulting roster, including the joiner.
    pub roster: Vec<MemberId>,
}
