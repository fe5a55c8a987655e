//! Mesh manager: one negotiated link per remote circle member.
//!
//! # Locking
//!
//! `MeshState` sits behind a std mutex that is never held across an
//! `.await`. Each link has its own async mutex, held for the whole of one
//! negotiation step, so links negotiate concurrently while messages for the
//! same remote are applied in order. Engine calls are bounded by the link's
//! deadline, so no step holds a link lock past it.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::error::{MeshError, MeshResult, NegotiationError, NegotiationResult};
use super::types::{LinkState, MeshConfig, MeshEvent, SdpKind};
use super::{PeerConnection, PeerConnectionFactory, SignalSink};
use crate::media::{LocalMedia, LocalMediaController, MediaConfig};
use crate::protocol::{CircleId, ClientMessage, MemberId, ServerMessage};

/// Deadline used when the configured timeout overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct PeerLink {
    remote: MemberId,
    generation: u64,
    state: LinkState,
    deadline: Instant,
    connection: Option<Box<dyn PeerConnection>>,
    remote_description_set: bool,
    pending_candidates: VecDeque<Value>,
}

type LinkHandle = Arc<AsyncMutex<PeerLink>>;
type LinkGuard = OwnedMutexGuard<PeerLink>;

struct LinkSlot {
    generation: u64,
    link: LinkHandle,
}

#[derive(Clone)]
struct ActiveCall {
    circle_id: CircleId,
    media: LocalMedia,
}

#[derive(Default)]
struct MeshState {
    call: Option<ActiveCall>,
    links: HashMap<MemberId, LinkSlot>,
    /// Candidates from remotes that have no link yet.
    orphan_candidates: HashMap<MemberId, VecDeque<Value>>,
}

enum Install {
    Installed(LinkGuard),
    Occupied(LinkHandle),
    NoCall,
}

struct MeshInner {
    local_id: MemberId,
    config: MeshConfig,
    factory: Arc<dyn PeerConnectionFactory>,
    media: Arc<LocalMediaController>,
    signal: Arc<dyn SignalSink>,
    events: mpsc::UnboundedSender<MeshEvent>,
    state: Mutex<MeshState>,
    next_generation: AtomicU64,
}

/// Drives the full mesh of a local member's call.
///
/// Feed every frame received from the signaling server into
/// [`handle_server_message`](Self::handle_server_message) and every local
/// network candidate produced by the engine into
/// [`send_local_candidate`](Self::send_local_candidate). State changes are
/// reported on the [`MeshEvent`] channel returned by [`new`](Self::new).
///
/// Cloning is cheap; clones drive the same mesh.
#[derive(Clone)]
pub struct MeshManager {
    inner: Arc<MeshInner>,
}

impl MeshManager {
    /// Creates an idle mesh for `local_id` and its event stream.
    #[must_use]
    pub fn new(
        local_id: MemberId,
        config: MeshConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        media: Arc<LocalMediaController>,
        signal: Arc<dyn SignalSink>,
    ) -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = MeshInner {
            local_id,
            config,
            factory,
            media,
            signal,
            events,
            state: Mutex::new(MeshState::default()),
            next_generation: AtomicU64::new(1),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// The local member id.
    #[must_use]
    pub fn local_id(&self) -> &MemberId {
        &self.inner.local_id
    }

    /// Acquires local media and joins `circle_id`.
    ///
    /// On media failure a single [`MeshEvent::CallFailed`] is emitted and no
    /// link is ever created.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Media`] if capture fails,
    /// [`MeshError::AlreadyInCall`] if a call is active, or
    /// [`MeshError::Signal`] if the join cannot be sent.
    pub async fn start_call(
        &self,
        circle_id: CircleId,
        media_config: &MediaConfig,
    ) -> MeshResult<LocalMedia> {
        if self.is_in_call() {
            return Err(MeshError::AlreadyInCall);
        }
        let media = match self.inner.media.acquire(media_config).await {
            Ok(media) => media,
            Err(error) => {
                warn!(circle = %circle_id, %error, "Call start failed");
                self.inner.emit(MeshEvent::CallFailed {
                    error: error.clone(),
                });
                return Err(error.into());
            }
        };

        {
            let mut state = self.inner.lock_state();
            if state.call.is_some() {
                return Err(MeshError::AlreadyInCall);
            }
            state.call = Some(ActiveCall {
                circle_id: circle_id.clone(),
                media: media.clone(),
            });
        }

        if let Err(e) = self.inner.signal.send(ClientMessage::JoinCircle {
            circle_id: circle_id.clone(),
        }) {
            self.inner.lock_state().call = None;
            self.inner.media.release().await;
            return Err(e);
        }
        info!(circle = %circle_id, member = %self.inner.local_id.short(), "Call started");
        Ok(media)
    }

    /// Leaves the circle, closes every link and releases local media.
    ///
    /// Links still negotiating are closed too. Returns `false` (and does
    /// nothing) if no call is active, so media is released exactly once.
    pub async fn end_call(&self) -> bool {
        let (call, slots) = {
            let mut state = self.inner.lock_state();
            let Some(call) = state.call.take() else {
                return false;
            };
            state.orphan_candidates.clear();
            let slots: Vec<LinkSlot> = state.links.drain().map(|(_, slot)| slot).collect();
            (call, slots)
        };

        if let Err(e) = self.inner.signal.send(ClientMessage::LeaveCircle {
            circle_id: call.circle_id.clone(),
        }) {
            debug!(error = %e, "Leave not sent");
        }

        let closed = self.inner.close_all(slots).await;

        self.inner.media.release().await;
        info!(circle = %call.circle_id, links = closed, "Call ended");
        true
    }

    /// Applies one frame from the signaling server.
    ///
    /// Frames for other circles, or received while no call is active, are
    /// ignored. Negotiation failures close only the affected link.
    pub async fn handle_server_message(&self, msg: ServerMessage) {
        let Some(call) = self.inner.active_call() else {
            debug!(msg_type = msg.msg_type(), "No active call, frame ignored");
            return;
        };
        let inner = &self.inner;

        match msg {
            ServerMessage::Roster { circle_id, members } if circle_id == call.circle_id => {
                let offers = members
                    .into_iter()
                    .filter(|remote| inner.local_id.offers_to(remote))
                    .map(|remote| inner.open_offer(remote, &call));
                join_all(offers).await;
            }
            ServerMessage::MemberJoined {
                circle_id,
                member_id,
            } if circle_id == call.circle_id => {
                if inner.local_id.offers_to(&member_id) {
                    inner.open_offer(member_id, &call).await;
                } else {
                    debug!(remote = %member_id.short(), "Waiting for remote offer");
                }
            }
            ServerMessage::MemberLeft {
                circle_id,
                member_id,
            } if circle_id == call.circle_id => {
                inner.remove_link(&member_id).await;
            }
            ServerMessage::Offer {
                circle_id,
                from,
                sdp,
            } if circle_id == call.circle_id => {
                inner.accept_offer(from, sdp, &call).await;
            }
            ServerMessage::Answer {
                circle_id,
                from,
                sdp,
            } if circle_id == call.circle_id => {
                inner.accept_answer(&from, &sdp).await;
            }
            ServerMessage::IceCandidate {
                circle_id,
                from,
                candidate,
            } if circle_id == call.circle_id => {
                inner.accept_candidate(from, candidate).await;
            }
            other => {
                debug!(msg_type = other.msg_type(), "Frame not handled by mesh");
            }
        }
    }

    /// Sends a local network candidate to `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NotInCall`] without an active call, or
    /// [`MeshError::Signal`] if the frame cannot be sent.
    pub fn send_local_candidate(&self, remote: &MemberId, candidate: Value) -> MeshResult<()> {
        let call = self.inner.active_call().ok_or(MeshError::NotInCall)?;
        self.inner.signal.send(ClientMessage::IceCandidate {
            target: remote.clone(),
            candidate,
            circle_id: Some(call.circle_id),
        })
    }

    /// Reports that the engine lost the connection to `remote`.
    ///
    /// The link is closed and a [`MeshEvent::PeerFailed`] is emitted; other
    /// links are unaffected.
    pub async fn handle_connection_failed(&self, remote: &MemberId) {
        let Some(mut link) = self.inner.lock_link(remote, None).await else {
            return;
        };
        if link.state != LinkState::Closed {
            self.inner
                .fail_link(
                    &mut link,
                    NegotiationError::Engine("connection failed".to_string()),
                )
                .await;
        }
    }

    /// Returns whether a call is active.
    #[must_use]
    pub fn is_in_call(&self) -> bool {
        self.inner.lock_state().call.is_some()
    }

    /// Circle of the active call.
    #[must_use]
    pub fn circle_id(&self) -> Option<CircleId> {
        self.inner.active_call().map(|call| call.circle_id)
    }

    /// Number of live links.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.inner.lock_state().links.len()
    }

    /// Remotes with a live link, sorted.
    #[must_use]
    pub fn remotes(&self) -> Vec<MemberId> {
        let mut remotes: Vec<MemberId> = self.inner.lock_state().links.keys().cloned().collect();
        remotes.sort();
        remotes
    }

    /// Current state of the link to `remote`.
    pub async fn link_state(&self, remote: &MemberId) -> Option<LinkState> {
        let link = self.inner.lock_link(remote, None).await?;
        Some(link.state)
    }

    /// Candidates from `remote` waiting for a remote description.
    pub async fn buffered_candidates(&self, remote: &MemberId) -> usize {
        let orphaned = self
            .inner
            .lock_state()
            .orphan_candidates
            .get(remote)
            .map_or(0, VecDeque::len);
        match self.inner.lock_link(remote, None).await {
            Some(link) => orphaned + link.pending_candidates.len(),
            None => orphaned,
        }
    }
}

impl MeshInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_call(&self) -> Option<ActiveCall> {
        self.lock_state().call.clone()
    }

    fn emit(&self, event: MeshEvent) {
        if self.events.send(event).is_err() {
            debug!("Mesh event receiver dropped");
        }
    }

    fn emit_state(&self, remote: &MemberId, state: LinkState) {
        self.emit(MeshEvent::PeerStateChanged {
            remote: remote.clone(),
            state,
        });
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.negotiation_timeout)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Creates a link for `remote` unless one exists.
    ///
    /// `replacing` names the generation of a link the caller has already
    /// closed; it is overwritten. The returned guard is taken before the
    /// link becomes visible, so no other handler can observe it half-built.
    fn install_link(
        self: &Arc<Self>,
        remote: &MemberId,
        state: LinkState,
        replacing: Option<u64>,
    ) -> Install {
        let (guard, generation, deadline) = {
            let mut mesh = self.lock_state();
            if mesh.call.is_none() {
                return Install::NoCall;
            }
            if let Some(slot) = mesh.links.get(remote) {
                if Some(slot.generation) != replacing {
                    return Install::Occupied(Arc::clone(&slot.link));
                }
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let deadline = self.deadline();
            let link = Arc::new(AsyncMutex::new(PeerLink {
                remote: remote.clone(),
                generation,
                state,
                deadline,
                connection: None,
                remote_description_set: false,
                pending_candidates: mesh.orphan_candidates.remove(remote).unwrap_or_default(),
            }));
            let Ok(guard) = Arc::clone(&link).try_lock_owned() else {
                return Install::Occupied(link);
            };
            mesh.links
                .insert(remote.clone(), LinkSlot { generation, link });
            (guard, generation, deadline)
        };

        self.spawn_timeout(remote.clone(), generation, deadline);
        self.emit_state(remote, state);
        Install::Installed(guard)
    }

    fn spawn_timeout(self: &Arc<Self>, remote: MemberId, generation: u64, deadline: Instant) {
        let mesh = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(mesh) = mesh.upgrade() else {
                return;
            };
            if let Some(mut link) = mesh.lock_link(&remote, Some(generation)).await {
                if link.state.is_negotiating() {
                    mesh.fail_link(&mut link, NegotiationError::TimedOut).await;
                }
            }
        });
    }

    /// Locks the current link to `remote`, optionally only if it is still
    /// the given generation.
    async fn lock_link(&self, remote: &MemberId, generation: Option<u64>) -> Option<LinkGuard> {
        let handle = {
            let mesh = self.lock_state();
            let slot = mesh.links.get(remote)?;
            if generation.is_some_and(|g| g != slot.generation) {
                return None;
            }
            Arc::clone(&slot.link)
        };
        Some(handle.lock_owned().await)
    }

    /// Drops the map entry for a link if it is still the current one.
    fn forget(&self, remote: &MemberId, generation: u64) {
        let mut mesh = self.lock_state();
        if mesh
            .links
            .get(remote)
            .is_some_and(|slot| slot.generation == generation)
        {
            mesh.links.remove(remote);
        }
    }

    /// Closes the link's connection. Returns `false` if it was closed already.
    async fn close_link(&self, link: &mut PeerLink) -> bool {
        if link.state == LinkState::Closed {
            return false;
        }
        link.state = LinkState::Closed;
        link.pending_candidates.clear();
        if let Some(connection) = link.connection.take() {
            connection.close().await;
        }
        debug!(remote = %link.remote.short(), generation = link.generation, "Link closed");
        true
    }

    async fn fail_link(&self, link: &mut PeerLink, error: NegotiationError) {
        warn!(
            remote = %link.remote.short(),
            state = %link.state,
            %error,
            "Peer link failed"
        );
        self.close_link(link).await;
        self.forget(&link.remote, link.generation);
        self.emit(MeshEvent::PeerFailed {
            remote: link.remote.clone(),
            error,
        });
    }

    /// Closes every slot concurrently. Returns how many links this call
    /// actually closed; slots already closed are not counted.
    async fn close_all(&self, slots: Vec<LinkSlot>) -> usize {
        let results = join_all(slots.into_iter().map(|slot| async move {
            let mut link = slot.link.lock_owned().await;
            let closed = self.close_link(&mut link).await;
            if closed {
                self.emit(MeshEvent::PeerRemoved {
                    remote: link.remote.clone(),
                });
            }
            closed
        }))
        .await;
        results.into_iter().filter(|closed| *closed).count()
    }

    async fn remove_link(&self, remote: &MemberId) {
        let slot = {
            let mut mesh = self.lock_state();
            mesh.orphan_candidates.remove(remote);
            mesh.links.remove(remote)
        };
        let Some(slot) = slot else {
            debug!(remote = %remote.short(), "Member left without a link");
            return;
        };
        let mut link = slot.link.lock_owned().await;
        if self.close_link(&mut link).await {
            info!(remote = %remote.short(), "Peer removed");
            self.emit(MeshEvent::PeerRemoved {
                remote: remote.clone(),
            });
        }
    }

    async fn open_offer(self: &Arc<Self>, remote: MemberId, call: &ActiveCall) {
        let mut link = match self.install_link(&remote, LinkState::Offering, None) {
            Install::Installed(link) => link,
            Install::Occupied(_) => {
                debug!(remote = %remote.short(), "Link exists, not offering");
                return;
            }
            Install::NoCall => return,
        };
        if let Err(error) = self.send_offer(&mut link, call).await {
            self.fail_link(&mut link, error).await;
        }
    }

    async fn send_offer(&self, link: &mut PeerLink, call: &ActiveCall) -> NegotiationResult<()> {
        let deadline = link.deadline;
        let connection = link
            .connection
            .insert(within(deadline, self.factory.create(&link.remote, &call.media)).await?);
        let sdp = within(deadline, connection.create_offer()).await?;
        self.signal(ClientMessage::Offer {
            target: link.remote.clone(),
            sdp,
            circle_id: Some(call.circle_id.clone()),
        })?;
        debug!(remote = %link.remote.short(), "Offer sent");
        Ok(())
    }

    async fn accept_offer(self: &Arc<Self>, from: MemberId, sdp: String, call: &ActiveCall) {
        let mut replacing = None;
        let mut link = loop {
            let existing = match self.install_link(&from, LinkState::Answering, replacing) {
                Install::Installed(link) => break link,
                Install::Occupied(existing) => existing,
                Install::NoCall => return,
            };
            let mut existing = existing.lock_owned().await;
            match existing.state {
                LinkState::Offering if self.local_id.offers_to(&from) => {
                    debug!(remote = %from.short(), "Glare: keeping local offer");
                    return;
                }
                LinkState::Answering => {
                    debug!(remote = %from.short(), "Duplicate offer ignored");
                    return;
                }
                state => {
                    info!(remote = %from.short(), %state, "Replacing link for new offer");
                    self.close_link(&mut existing).await;
                    replacing = Some(existing.generation);
                }
            }
        };

        if let Err(error) = self.send_answer(&mut link, &sdp, call).await {
            self.fail_link(&mut link, error).await;
        }
    }

    async fn send_answer(
        &self,
        link: &mut PeerLink,
        offer: &str,
        call: &ActiveCall,
    ) -> NegotiationResult<()> {
        let deadline = link.deadline;
        let connection = link
            .connection
            .insert(within(deadline, self.factory.create(&link.remote, &call.media)).await?);
        within(
            deadline,
            connection.set_remote_description(SdpKind::Offer, offer),
        )
        .await?;
        link.remote_description_set = true;
        Self::flush_candidates(link).await;

        let Some(connection) = link.connection.as_deref() else {
            return Err(NegotiationError::Engine("connection missing".to_string()));
        };
        let sdp = within(deadline, connection.create_answer()).await?;
        self.signal(ClientMessage::Answer {
            target: link.remote.clone(),
            sdp,
            circle_id: Some(call.circle_id.clone()),
        })?;

        link.state = LinkState::Connected;
        self.emit_state(&link.remote, LinkState::Connected);
        info!(remote = %link.remote.short(), "Answered, link connected");
        Ok(())
    }

    async fn accept_answer(&self, from: &MemberId, sdp: &str) {
        let Some(mut link) = self.lock_link(from, None).await else {
            debug!(remote = %from.short(), "Answer without a link ignored");
            return;
        };
        if link.state != LinkState::Offering {
            debug!(remote = %from.short(), state = %link.state, "Unexpected answer ignored");
            return;
        }

        let deadline = link.deadline;
        let applied = match link.connection.as_deref() {
            Some(connection) => {
                within(deadline, connection.set_remote_description(SdpKind::Answer, sdp)).await
            }
            None => Err(NegotiationError::Engine("connection missing".to_string())),
        };
        if let Err(error) = applied {
            self.fail_link(&mut link, error).await;
            return;
        }

        link.remote_description_set = true;
        Self::flush_candidates(&mut link).await;
        link.state = LinkState::Connected;
        self.emit_state(from, LinkState::Connected);
        info!(remote = %from.short(), "Answer applied, link connected");
    }

    async fn accept_candidate(&self, from: MemberId, candidate: Value) {
        let max = self.config.max_buffered_candidates;
        let handle = {
            let mut mesh = self.lock_state();
            match mesh.links.get(&from) {
                Some(slot) => Arc::clone(&slot.link),
                None => {
                    let buffer = mesh.orphan_candidates.entry(from).or_default();
                    push_bounded(buffer, candidate, max);
                    debug!(buffered = buffer.len(), "Candidate buffered before negotiation");
                    return;
                }
            }
        };

        let mut link = handle.lock_owned().await;
        if link.state == LinkState::Closed {
            debug!(remote = %from.short(), "Candidate for closed link dropped");
            return;
        }
        if !link.remote_description_set {
            push_bounded(&mut link.pending_candidates, candidate, max);
            return;
        }
        if let Some(connection) = link.connection.as_deref() {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!(remote = %from.short(), error = %e, "Candidate rejected");
            }
        }
    }

    async fn flush_candidates(link: &mut PeerLink) {
        let Some(connection) = link.connection.as_deref() else {
            return;
        };
        let flushed = link.pending_candidates.len();
        while let Some(candidate) = link.pending_candidates.pop_front() {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!(remote = %link.remote.short(), error = %e, "Buffered candidate rejected");
            }
        }
        if flushed > 0 {
            debug!(remote = %link.remote.short(), flushed, "Buffered candidates applied");
        }
    }

    fn signal(&self, msg: ClientMessage) -> NegotiationResult<()> {
        self.signal
            .send(msg)
            .map_err(|e| NegotiationError::Signal(e.to_string()))
    }
}

/// Runs an engine call, failing with `TimedOut` at `deadline`.
async fn within<T>(
    deadline: Instant,
    call: impl Future<Output = NegotiationResult<T>>,
) -> NegotiationResult<T> {
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or(Err(NegotiationError::TimedOut))
}

/// Appends a candidate, dropping the oldest once `max` are held.
fn push_bounded(buffer: &mut VecDeque<Value>, candidate: Value, max: usize) {
    if max == 0 {
        return;
    }
    while buffer.len() >= max {
        buffer.pop_front();
    }
    buffer.push_back(candidate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaError;
    use crate::testing::{FakeCaptureDevice, ScriptedEngine};
    use serde_json::json;

    struct Harness {
        mesh: MeshManager,
        events: mpsc::UnboundedReceiver<MeshEvent>,
        signals: mpsc::UnboundedReceiver<ClientMessage>,
        engine: Arc<ScriptedEngine>,
        device: Arc<FakeCaptureDevice>,
    }

    fn harness(local: &str, config: MeshConfig) -> Harness {
        harness_with_device(local, config, FakeCaptureDevice::new())
    }

    fn harness_with_device(local: &str, config: MeshConfig, device: FakeCaptureDevice) -> Harness {
        let engine = Arc::new(ScriptedEngine::new());
        let device = Arc::new(device);
        let controller = Arc::new(LocalMediaController::new(device.clone()));
        let (tx, signals) = mpsc::unbounded_channel();
        let (mesh, events) = MeshManager::new(
            MemberId::from(local),
            config,
            engine.clone(),
            controller,
            Arc::new(tx),
        );
        Harness {
            mesh,
            events,
            signals,
            engine,
            device,
        }
    }

    fn room() -> CircleId {
        CircleId::from("room1")
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    async fn in_call(local: &str) -> Harness {
        let mut h = harness(local, MeshConfig::default());
        h.mesh.start_call(room(), &MediaConfig::default()).await.unwrap();
        drain(&mut h.signals);
        h
    }

    fn joined(member: &str) -> ServerMessage {
        ServerMessage::MemberJoined {
            circle_id: room(),
            member_id: member.into(),
        }
    }

    fn offer_from(member: &str) -> ServerMessage {
        ServerMessage::Offer {
            circle_id: room(),
            from: member.into(),
            sdp: format!("offer-from-{member}"),
        }
    }

    fn answer_from(member: &str) -> ServerMessage {
        ServerMessage::Answer {
            circle_id: room(),
            from: member.into(),
            sdp: format!("answer-from-{member}"),
        }
    }

    fn candidate_from(member: &str, n: u32) -> ServerMessage {
        ServerMessage::IceCandidate {
            circle_id: room(),
            from: member.into(),
            candidate: json!({"candidate": format!("c{n}")}),
        }
    }

    #[tokio::test]
    async fn start_call_joins_circle() {
        let mut h = harness("a", MeshConfig::default());

        h.mesh.start_call(room(), &MediaConfig::default()).await.unwrap();

        assert!(h.mesh.is_in_call());
        assert_eq!(
            drain(&mut h.signals),
            vec![ClientMessage::JoinCircle { circle_id: room() }]
        );
    }

    #[tokio::test]
    async fn media_failure_creates_no_links() {
        let mut h = harness_with_device(
            "a",
            MeshConfig::default(),
            FakeCaptureDevice::failing(MediaError::PermissionDenied),
        );

        let result = h.mesh.start_call(room(), &MediaConfig::default()).await;

        assert!(matches!(
            result,
            Err(MeshError::Media(MediaError::PermissionDenied))
        ));
        assert!(!h.mesh.is_in_call());
        h.mesh.handle_server_message(joined("b")).await;
        assert_eq!(h.mesh.peer_count(), 0);
        assert!(h.engine.created().is_empty());
        assert_eq!(
            drain(&mut h.events),
            vec![MeshEvent::CallFailed {
                error: MediaError::PermissionDenied
            }]
        );
        assert!(drain(&mut h.signals).is_empty());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let h = in_call("a").await;
        assert!(matches!(
            h.mesh.start_call(room(), &MediaConfig::default()).await,
            Err(MeshError::AlreadyInCall)
        ));
    }

    #[tokio::test]
    async fn lower_id_offers_on_member_joined() {
        let mut h = in_call("a").await;

        h.mesh.handle_server_message(joined("b")).await;

        assert_eq!(h.mesh.link_state(&"b".into()).await, Some(LinkState::Offering));
        let sent = drain(&mut h.signals);
        assert!(matches!(
            sent.as_slice(),
            [ClientMessage::Offer { target, .. }] if *target == MemberId::from("b")
        ));
    }

    #[tokio::test]
    async fn higher_id_waits_for_offer() {
        let mut h = in_call("b").await;

        h.mesh.handle_server_message(joined("a")).await;

        assert_eq!(h.mesh.peer_count(), 0);
        assert!(drain(&mut h.signals).is_empty());
    }

    #[tokio::test]
    async fn roster_offers_only_to_higher_ids() {
        let mut h = in_call("m").await;

        h.mesh
            .handle_server_message(ServerMessage::Roster {
                circle_id: room(),
                members: vec!["a".into(), "x".into(), "z".into()],
            })
            .await;

        assert_eq!(h.mesh.remotes(), vec![MemberId::from("x"), MemberId::from("z")]);
        let targets: Vec<MemberId> = drain(&mut h.signals)
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Offer { target, .. } => Some(target),
                _ => None,
            })
            .collect();
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn answer_connects_offering_link() {
        let mut h = in_call("a").await;
        h.mesh.handle_server_message(joined("b")).await;

        h.mesh.handle_server_message(answer_from("b")).await;

        assert_eq!(h.mesh.link_state(&"b".into()).await, Some(LinkState::Connected));
        assert_eq!(
            h.engine.remote_descriptions(&"b".into()),
            vec![(SdpKind::Answer, "answer-from-b".to_string())]
        );
        let states: Vec<LinkState> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                MeshEvent::PeerStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![LinkState::Offering, LinkState::Connected]);
    }

    #[tokio::test]
    async fn inbound_offer_is_answered() {
        let mut h = in_call("b").await;

        h.mesh.handle_server_message(offer_from("a")).await;

        assert_eq!(h.mesh.link_state(&"a".into()).await, Some(LinkState::Connected));
        assert_eq!(
            drain(&mut h.signals),
            vec![ClientMessage::Answer {
                target: "a".into(),
                sdp: "answer-to-a".to_string(),
                circle_id: Some(room()),
            }]
        );
    }

    #[tokio::test]
    async fn glare_lower_id_keeps_its_offer() {
        let mut h = in_call("a").await;
        h.mesh.handle_server_message(joined("b")).await;
        drain(&mut h.signals);

        h.mesh.handle_server_message(offer_from("b")).await;

        assert_eq!(h.mesh.link_state(&"b".into()).await, Some(LinkState::Offering));
        assert!(drain(&mut h.signals).is_empty());
        assert_eq!(h.engine.created().len(), 1);
    }

    #[tokio::test]
    async fn early_candidates_are_buffered_then_flushed() {
        let h = in_call("b").await;

        h.mesh.handle_server_message(candidate_from("a", 1)).await;
        h.mesh.handle_server_message(candidate_from("a", 2)).await;
        assert_eq!(h.mesh.buffered_candidates(&"a".into()).await, 2);
        assert!(h.engine.applied_candidates(&"a".into()).is_empty());

        h.mesh.handle_server_message(offer_from("a")).await;

        assert_eq!(h.mesh.buffered_candidates(&"a".into()).await, 0);
        assert_eq!(
            h.engine.applied_candidates(&"a".into()),
            vec![json!({"candidate": "c1"}), json!({"candidate": "c2"})]
        );
    }

    #[tokio::test]
    async fn candidates_wait_for_answer_while_offering() {
        let h = in_call("a").await;
        h.mesh.handle_server_message(joined("b")).await;

        h.mesh.handle_server_message(candidate_from("b", 1)).await;
        assert!(h.engine.applied_candidates(&"b".into()).is_empty());

        h.mesh.handle_server_message(answer_from("b")).await;
        h.mesh.handle_server_message(candidate_from("b", 2)).await;

        assert_eq!(h.engine.applied_candidates(&"b".into()).len(), 2);
    }

    #[tokio::test]
    async fn candidate_buffer_is_bounded() {
        let mut h = harness("b", MeshConfig::new().with_max_buffered_candidates(2));
        h.mesh.start_call(room(), &MediaConfig::default()).await.unwrap();
        for n in 0..5 {
            h.mesh.handle_server_message(candidate_from("a", n)).await;
        }

        h.mesh.handle_server_message(offer_from("a")).await;

        assert_eq!(
            h.engine.applied_candidates(&"a".into()),
            vec![json!({"candidate": "c3"}), json!({"candidate": "c4"})]
        );
        drain(&mut h.signals);
    }

    #[tokio::test]
    async fn member_left_closes_link_and_discards_buffers() {
        let mut h = in_call("a").await;
        h.mesh.handle_server_message(joined("b")).await;
        h.mesh.handle_server_message(candidate_from("c", 1)).await;

        for gone in ["b", "c"] {
            h.mesh
                .handle_server_message(ServerMessage::MemberLeft {
                    circle_id: room(),
                    member_id: gone.into(),
                })
                .await;
        }

        assert_eq!(h.mesh.peer_count(), 0);
        assert_eq!(h.engine.closed_count(&"b".into()), 1);
        assert_eq!(h.mesh.buffered_candidates(&"c".into()).await, 0);
        assert!(drain(&mut h.events)
            .contains(&MeshEvent::PeerRemoved { remote: "b".into() }));
    }

    #[tokio::test]
    async fn rejected_description_fails_only_that_peer() {
        let mut h = in_call("a").await;
        h.engine.reject_remote_descriptions_from(&"b".into());
        h.mesh.handle_server_message(joined("b")).await;
        h.mesh.handle_server_message(joined("c")).await;

        h.mesh.handle_server_message(answer_from("b")).await;
        h.mesh.handle_server_message(answer_from("c")).await;

        assert_eq!(h.mesh.remotes(), vec![MemberId::from("c")]);
        assert_eq!(h.mesh.link_state(&"c".into()).await, Some(LinkState::Connected));
        let failures: Vec<MeshEvent> = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, MeshEvent::PeerFailed { .. }))
            .collect();
        assert!(matches!(
            failures.as_slice(),
            [MeshEvent::PeerFailed { remote, error: NegotiationError::RemoteDescriptionRejected(_) }]
                if *remote == MemberId::from("b")
        ));
    }

    #[tokio::test]
    async fn remote_restart_replaces_connected_link() {
        let mut h = in_call("b").await;
        h.mesh.handle_server_message(offer_from("a")).await;
        drain(&mut h.signals);

        h.mesh.handle_server_message(offer_from("a")).await;

        assert_eq!(h.mesh.peer_count(), 1);
        assert_eq!(h.mesh.link_state(&"a".into()).await, Some(LinkState::Connected));
        assert_eq!(h.engine.created().len(), 2);
        assert_eq!(h.engine.closed_count(&"a".into()), 1);
        assert_eq!(drain(&mut h.signals).len(), 1);
    }

    #[tokio::test]
    async fn connection_failure_is_contained() {
        let mut h = in_call("a").await;
        for m in ["b", "c"] {
            h.mesh.handle_server_message(joined(m)).await;
            h.mesh.handle_server_message(answer_from(m)).await;
        }
        drain(&mut h.events);

        h.mesh.handle_connection_failed(&"b".into()).await;

        assert_eq!(h.mesh.remotes(), vec![MemberId::from("c")]);
        assert!(matches!(
            drain(&mut h.events).as_slice(),
            [MeshEvent::PeerFailed { error: NegotiationError::Engine(_), .. }]
        ));
    }

    #[tokio::test]
    async fn stalled_offer_times_out() {
        let mut h = harness(
            "a",
            MeshConfig::new().with_negotiation_timeout(Duration::from_millis(50)),
        );
        h.mesh.start_call(room(), &MediaConfig::default()).await.unwrap();
        h.mesh.handle_server_message(joined("b")).await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.mesh.peer_count(), 0);
        assert!(drain(&mut h.events).contains(&MeshEvent::PeerFailed {
            remote: "b".into(),
            error: NegotiationError::TimedOut,
        }));
    }

    #[tokio::test]
    async fn connected_link_survives_timeout() {
        let h = harness(
            "a",
            MeshConfig::new().with_negotiation_timeout(Duration::from_millis(50)),
        );
        h.mesh.start_call(room(), &MediaConfig::default()).await.unwrap();
        h.mesh.handle_server_message(joined("b")).await;
        h.mesh.handle_server_message(answer_from("b")).await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(h.mesh.link_state(&"b".into()).await, Some(LinkState::Connected));
    }

    #[tokio::test]
    async fn hung_engine_is_cut_off_by_deadline() {
        let mut h = harness(
            "a",
            MeshConfig::new().with_negotiation_timeout(Duration::from_millis(50)),
        );
        h.engine.stall_offers_for(&"b".into());
        h.mesh.start_call(room(), &MediaConfig::default()).await.unwrap();

        h.mesh.handle_server_message(joined("b")).await;

        assert_eq!(h.mesh.peer_count(), 0);
        assert!(drain(&mut h.events).contains(&MeshEvent::PeerFailed {
            remote: "b".into(),
            error: NegotiationError::TimedOut,
        }));
    }

    #[tokio::test]
    async fn end_call_closes_everything_and_releases_once() {
        let mut h = in_call("a").await;
        h.mesh.handle_server_message(joined("b")).await;
        h.mesh.handle_server_message(answer_from("b")).await;
        h.mesh.handle_server_message(joined("c")).await;
        drain(&mut h.signals);

        assert!(h.mesh.end_call().await);
        assert!(!h.mesh.end_call().await);

        assert_eq!(h.mesh.peer_count(), 0);
        assert_eq!(h.engine.closed_count(&"b".into()), 1);
        assert_eq!(h.engine.closed_count(&"c".into()), 1);
        assert_eq!(h.device.stops(), 1);
        assert_eq!(
            drain(&mut h.signals),
            vec![ClientMessage::LeaveCircle { circle_id: room() }]
        );
    }

    #[tokio::test]
    async fn close_all_counts_only_links_it_closed() {
        let mut h = in_call("a").await;
        h.mesh.handle_server_message(joined("b")).await;
        h.mesh.handle_server_message(joined("c")).await;
        {
            let mut link = h.mesh.inner.lock_link(&"b".into(), None).await.unwrap();
            assert!(h.mesh.inner.close_link(&mut link).await);
        }
        drain(&mut h.events);

        let slots: Vec<LinkSlot> = h
            .mesh
            .inner
            .lock_state()
            .links
            .drain()
            .map(|(_, slot)| slot)
            .collect();
        let closed = h.mesh.inner.close_all(slots).await;

        assert_eq!(closed, 1);
        assert_eq!(
            drain(&mut h.events),
            vec![MeshEvent::PeerRemoved { remote: "c".into() }]
        );
        assert_eq!(h.engine.closed_count(&"b".into()), 1);
    }

    #[tokio::test]
    async fn frames_for_other_circles_are_ignored() {
        let h = in_call("a").await;
        h.mesh
            .handle_server_message(ServerMessage::MemberJoined {
                circle_id: "elsewhere".into(),
                member_id: "b".into(),
            })
            .await;
        assert_eq!(h.mesh.peer_count(), 0);
    }

    #[tokio::test]
    async fn local_candidates_are_addressed() {
        let mut h = in_call("a").await;

        h.mesh
            .send_local_candidate(&"b".into(), json!({"candidate": "x"}))
            .unwrap();

        assert_eq!(
            drain(&mut h.signals),
            vec![ClientMessage::IceCandidate {
                target: "b".into(),
                candidate: json!({"candidate": "x"}),
                circle_id: Some(room()),
            }]
        );
    }

    #[test]
    fn push_bounded_drops_oldest() {
        let mut buffer = VecDeque::new();
        for n in 0..4 {
            push_bounded(&mut buffer, json!(n), 3);
        }
        assert_eq!(buffer, VecDeque::from(vec![json!(1), json!(2), json!(3)]));

        let mut none = VecDeque::new();
        push_bounded(&mut none, json!(0), 0);
        assert!(none.is_empty());
    }
}
