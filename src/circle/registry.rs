//! In-memory circle registry partitioned per circle.
//!
//! Each circle lives behind its own mutex. The outer map lock is held only
//! long enough to find, insert or retire an entry, so operations on
//! different circles never wait on each other's work.
//!
//! # Lock Order
//!
//! ```text
//! circles (outer map)   ── never held while waiting for a circle lock
//! circle mutex          ── may take `circles` (write) to retire itself
//!     └── memberships   ── reverse index, updated under the circle lock
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::types::{Circle, SharedStateEntry};
use crate::protocol::{CircleId, MemberId, ServerMessage};
use crate::transport::{Transport, TransportError};

/// Mutable state of one circle.
#[derive(Debug)]
struct CircleState {
    id: CircleId,
    members: BTreeSet<MemberId>,
    shared: HashMap<MemberId, SharedStateEntry>,
    created_at: DateTime<Utc>,
    /// Set once the circle is removed from the map; holders must re-resolve.
    closed: bool,
}

impl CircleState {
    fn new(id: CircleId) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
            shared: HashMap::new(),
            created_at: Utc::now(),
            closed: false,
        }
    }
}

type CircleHandle = Arc<Mutex<CircleState>>;

fn lock(handle: &CircleHandle) -> MutexGuard<'_, CircleState> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive view of one circle, handed to registry callers.
///
/// Membership changes made through this view keep the reverse
/// member→circles index in step.
pub struct CircleEntry<'a> {
    state: &'a mut CircleState,
    memberships: &'a RwLock<HashMap<MemberId, BTreeSet<CircleId>>>,
}

impl CircleEntry<'_> {
    /// Circle identifier.
    #[must_use]
    pub fn id(&self) -> &CircleId {
        &self.state.id
    }

    /// Returns whether `member` is joined.
    #[must_use]
    pub fn contains(&self, member: &MemberId) -> bool {
        self.state.members.contains(member)
    }

    /// Current roster in id order.
    #[must_use]
    pub fn members(&self) -> Vec<MemberId> {
        self.state.members.iter().cloned().collect()
    }

    /// Adds a member. Returns `false` if already present.
    pub fn add_member(&mut self, member: &MemberId) -> bool {
        if !self.state.members.insert(member.clone()) {
            return false;
        }
        self.memberships
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(member.clone())
            .or_default()
            .insert(self.state.id.clone());
        true
    }

    /// Removes a member. Returns `false` if it was not present.
    pub fn remove_member(&mut self, member: &MemberId) -> bool {
        if !self.state.members.remove(member) {
            return false;
        }
        let mut memberships = self
            .memberships
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(circles) = memberships.get_mut(member) {
            circles.remove(&self.state.id);
            if circles.is_empty() {
                memberships.remove(member);
            }
        }
        true
    }

    /// Stores the member's shared state, replacing any previous entry.
    pub fn put_shared(&mut self, member: &MemberId, entry: SharedStateEntry) {
        self.state.shared.insert(member.clone(), entry);
    }

    /// Removes the member's shared state, returning it if present.
    pub fn take_shared(&mut self, member: &MemberId) -> Option<SharedStateEntry> {
        self.state.shared.remove(member)
    }

    /// Returns the member's shared state, if any.
    #[must_use]
    pub fn shared(&self, member: &MemberId) -> Option<&SharedStateEntry> {
        self.state.shared.get(member)
    }

    /// All shared-state entries in member id order.
    #[must_use]
    pub fn shared_entries(&self) -> Vec<(MemberId, SharedStateEntry)> {
        let mut entries: Vec<_> = self
            .state
            .shared
            .iter()
            .map(|(member, entry)| (member.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Removes every entry shared before `cutoff`, returning the owners.
    pub fn take_shared_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<MemberId> {
        let mut expired: Vec<MemberId> = self
            .state
            .shared
            .iter()
            .filter(|(_, entry)| entry.shared_at < cutoff)
            .map(|(member, _)| member.clone())
            .collect();
        expired.sort();
        for member in &expired {
            self.state.shared.remove(member);
        }
        expired
    }

    /// Sends `msg` to every member except `except`.
    ///
    /// Members whose connection is already gone are skipped; they will be
    /// removed by their own disconnect. Returns the number of deliveries.
    pub fn broadcast(
        &self,
        transport: &dyn Transport,
        except: Option<&MemberId>,
        msg: &ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        for member in &self.state.members {
            if Some(member) == except {
                continue;
            }
            match transport.send(member, msg.clone()) {
                Ok(()) => delivered += 1,
                Err(TransportError::Dropped(_)) => {
                    debug!(
                        circle = %self.state.id,
                        member = %member.short(),
                        msg_type = msg.msg_type(),
                        "Broadcast target not connected"
                    );
                }
                Err(TransportError::Closed) => break,
            }
        }
        delivered
    }

    fn snapshot(&self) -> Circle {
        Circle {
            id: self.state.id.clone(),
            members: self.state.members.clone(),
            created_at: self.state.created_at,
        }
    }
}

/// Registry of live circles and their members.
///
/// Circles are created on first join and removed as soon as their last
/// member leaves. The registry is an owned service: construct one per
/// server and share it through `Arc`.
#[derive(Debug, Default)]
pub struct CircleRegistry {
    circles: RwLock<HashMap<CircleId, CircleHandle>>,
    memberships: RwLock<HashMap<MemberId, BTreeSet<CircleId>>>,
}

impl CircleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the circle, creating it if unseen.
    ///
    /// If `f` leaves the circle without members it is retired immediately.
    pub fn with_circle_or_create<R>(
        &self,
        id: &CircleId,
        f: impl FnOnce(&mut CircleEntry<'_>) -> R,
    ) -> R {
        loop {
            let handle = self.get_or_insert(id);
            let mut state = lock(&handle);
            if state.closed {
                continue;
            }
            return self.run(&handle, &mut state, f);
        }
    }

    /// Runs `f` with exclusive access to an existing circle.
    ///
    /// Returns `None` without calling `f` if the circle does not exist.
    pub fn with_circle<R>(
        &self,
        id: &CircleId,
        f: impl FnOnce(&mut CircleEntry<'_>) -> R,
    ) -> Option<R> {
        loop {
            let handle = self.get(id)?;
            let mut state = lock(&handle);
            if state.closed {
                continue;
            }
            return Some(self.run(&handle, &mut state, f));
        }
    }

    fn run<R>(
        &self,
        handle: &CircleHandle,
        state: &mut CircleState,
        f: impl FnOnce(&mut CircleEntry<'_>) -> R,
    ) -> R {
        let result = {
            let mut entry = CircleEntry {
                state: &mut *state,
                memberships: &self.memberships,
            };
            f(&mut entry)
        };
        if state.members.is_empty() {
            self.retire(handle, state);
        }
        result
    }

    fn get(&self, id: &CircleId) -> Option<CircleHandle> {
        self.circles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn get_or_insert(&self, id: &CircleId) -> CircleHandle {
        if let Some(handle) = self.get(id) {
            return handle;
        }
        let mut circles = self.circles.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(circles.entry(id.clone()).or_insert_with(|| {
            debug!(circle = %id, "Circle created");
            Arc::new(Mutex::new(CircleState::new(id.clone())))
        }))
    }

    /// Removes an empty circle. Caller holds the circle lock.
    fn retire(&self, handle: &CircleHandle, state: &mut CircleState) {
        state.closed = true;
        state.shared.clear();
        let mut circles = self.circles.write().unwrap_or_else(PoisonError::into_inner);
        if circles
            .get(&state.id)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            circles.remove(&state.id);
            info!(circle = %state.id, "Circle removed (empty)");
        }
    }

    /// Snapshot of a circle, if it exists.
    #[must_use]
    pub fn circle(&self, id: &CircleId) -> Option<Circle> {
        self.with_circle(id, |entry| entry.snapshot())
    }

    /// Current roster of a circle. Empty if the circle does not exist.
    #[must_use]
    pub fn roster(&self, id: &CircleId) -> Vec<MemberId> {
        self.with_circle(id, |entry| entry.members())
            .unwrap_or_default()
    }

    /// Returns whether `member` is joined to `circle`.
    #[must_use]
    pub fn is_member(&self, circle: &CircleId, member: &MemberId) -> bool {
        self.with_circle(circle, |entry| entry.contains(member))
            .unwrap_or(false)
    }

    /// Circles the member currently belongs to, in id order.
    #[must_use]
    pub fn circles_of(&self, member: &MemberId) -> Vec<CircleId> {
        self.memberships
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(member)
            .map(|circles| circles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every member joined to at least one circle.
    #[must_use]
    pub fn members(&self) -> Vec<MemberId> {
        self.memberships
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Ids of all live circles.
    #[must_use]
    pub fn circle_ids(&self) -> Vec<CircleId> {
        self.circles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of live circles.
    #[must_use]
    pub fn circle_count(&self) -> usize {
        self.circles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
