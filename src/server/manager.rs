//! Signaling server facade.
//!
//! Owns the registry and the three services built on it, and routes each
//! decoded client frame to the right one.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::error::{ServerError, ServerResult};
use super::types::ServerConfig;
use crate::circle::{CircleRegistry, PresenceManager};
use crate::protocol::{ClientMessage, MemberId, NegotiationMessage, ServerMessage};
use crate::sharing::StateBroadcaster;
use crate::signaling::{RelayOutcome, SignalingRelay};
use crate::transport::Transport;

/// Server side of circle signaling.
///
/// Construct once per process and inject the host's [`Transport`]. The
/// server rejects frames until [`start`](Self::start) is called.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use circle_signal::protocol::{ClientMessage, CircleId, ServerMessage};
/// use circle_signal::server::{ServerConfig, SignalingServer};
/// use circle_signal::transport::ChannelTransport;
///
/// let transport = Arc::new(ChannelTransport::new());
/// let server = SignalingServer::new(ServerConfig::default(), transport.clone());
/// server.start();
///
/// let alice = server.accept();
/// let mut rx = transport.register(alice.clone());
/// server.connect(&alice).unwrap();
/// server
///     .handle_message(&alice, ClientMessage::JoinCircle { circle_id: CircleId::from("room1") })
///     .unwrap();
///
/// assert!(matches!(rx.try_recv(), Ok(ServerMessage::Welcome { .. })));
/// assert!(matches!(rx.try_recv(), Ok(ServerMessage::Roster { .. })));
/// ```
pub struct SignalingServer {
    config: ServerConfig,
    registry: Arc<CircleRegistry>,
    transport: Arc<dyn Transport>,
    presence: PresenceManager,
    relay: SignalingRelay,
    broadcaster: StateBroadcaster,
    connected: RwLock<BTreeSet<MemberId>>,
    running: AtomicBool,
}

impl SignalingServer {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(CircleRegistry::new());
        Self {
            presence: PresenceManager::new(Arc::clone(&registry), Arc::clone(&transport)),
            relay: SignalingRelay::new(Arc::clone(&registry), Arc::clone(&transport)),
            broadcaster: StateBroadcaster::new(
                Arc::clone(&registry),
                Arc::clone(&transport),
                config.shared_state_ttl,
            ),
            config,
            registry,
            transport,
            connected: RwLock::new(BTreeSet::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Starts accepting frames.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Signaling server started");
        }
    }

    /// Stops the server and disconnects every member.
    ///
    /// Remaining members observe the usual `member_left` frames while the
    /// circles drain. All circles are gone afterwards.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut members: BTreeSet<MemberId> = std::mem::take(
            &mut *self
                .connected
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        members.extend(self.registry.members());
        for member in &members {
            self.presence.handle_disconnect(member);
            self.transport.close(member);
        }
        info!(disconnected = members.len(), "Signaling server stopped");
    }

    /// Returns whether the server accepts frames.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Allocates an id for a new connection.
    #[must_use]
    pub fn accept(&self) -> MemberId {
        MemberId::generate()
    }

    /// Marks `member` connected and sends it a `welcome` frame.
    ///
    /// The host must have registered the member with the transport first.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] if the server is stopped.
    pub fn connect(&self, member: &MemberId) -> ServerResult<()> {
        self.ensure_running()?;
        self.connected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member.clone());
        if self
            .transport
            .send(
                member,
                ServerMessage::Welcome {
                    member_id: member.clone(),
                },
            )
            .is_err()
        {
            debug!(member = %member.short(), "Welcome dropped");
        }
        info!(member = %member.short(), "Member connected");
        Ok(())
    }

    /// Handles a transport disconnect: leaves every circle of `member`.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn disconnect(&self, member: &MemberId) {
        let was_connected = self
            .connected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(member);
        let left = self.presence.handle_disconnect(member);
        if was_connected || !left.is_empty() {
            info!(member = %member.short(), circles = left.len(), "Member disconnected");
        }
    }

    /// Decodes and handles one raw client frame.
    ///
    /// Malformed frames are answered with an `error` frame to the sender.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] if stopped, or
    /// [`ServerError::Protocol`] if the frame cannot be decoded.
    pub fn handle_frame(&self, from: &MemberId, frame: &str) -> ServerResult<()> {
        self.ensure_running()?;
        let msg = match ClientMessage::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(member = %from.short(), error = %e, "Malformed frame");
                self.send_error(from, e.to_string());
                return Err(e.into());
            }
        };
        self.handle_message(from, msg)
    }

    /// Handles one decoded client message from `from`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] if stopped,
    /// [`ServerError::NotConnected`] if `from` has no live connection, or
    /// [`ServerError::PayloadTooLarge`] for an oversized `share_state`.
    pub fn handle_message(&self, from: &MemberId, msg: ClientMessage) -> ServerResult<()> {
        self.ensure_running()?;
        // Held until dispatch ends so a disconnect cannot slip in between
        // the check and a join.
        let connected = self.connected.read().unwrap_or_else(PoisonError::into_inner);
        if !connected.contains(from) {
            debug!(member = %from.short(), msg_type = msg.msg_type(), "Frame from unconnected member");
            return Err(ServerError::NotConnected(from.clone()));
        }
        debug!(member = %from.short(), msg_type = msg.msg_type(), "Client message");

        match msg {
            ClientMessage::JoinCircle { circle_id } => {
                self.presence.join(&circle_id, from);
            }
            ClientMessage::LeaveCircle { circle_id } => {
                self.presence.leave(&circle_id, from);
            }
            ClientMessage::ShareState { circle_id, payload } => {
                let size = payload.to_string().len();
                if size > self.config.max_payload_bytes {
                    let err = ServerError::PayloadTooLarge {
                        size,
                        limit: self.config.max_payload_bytes,
                    };
                    self.send_error(from, err.to_string());
                    return Err(err);
                }
                self.broadcaster.publish(&circle_id, from, payload);
            }
            ClientMessage::StopSharing { circle_id } => {
                self.broadcaster.unpublish(&circle_id, from);
            }
            negotiation @ (ClientMessage::Offer { .. }
            | ClientMessage::Answer { .. }
            | ClientMessage::IceCandidate { .. }) => {
                if let Some(msg) = NegotiationMessage::from_client(from.clone(), negotiation) {
                    if let RelayOutcome::Dropped { reason } = self.relay.relay(msg) {
                        debug!(member = %from.short(), ?reason, "Negotiation not delivered");
                    }
                }
            }
        }
        drop(connected);
        Ok(())
    }

    /// Removes shared-state entries older than the configured TTL.
    ///
    /// Hosts call this periodically, e.g. from a `tokio::time::interval`.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        self.broadcaster.prune_expired(now)
    }

    /// The registry backing this server.
    #[must_use]
    pub fn registry(&self) -> &CircleRegistry {
        &self.registry
    }

    /// The shared-state broadcaster.
    #[must_use]
    pub const fn broadcaster(&self) -> &StateBroadcaster {
        &self.broadcaster
    }

    /// Number of connected members.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connected
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn ensure_running(&self) -> ServerResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ServerError::NotRunning)
        }
    }

    fn send_error(&self, to: &MemberId, message: String) {
        if self
            .transport
            .send(to, ServerMessage::Error { message })
            .is_err()
        {
            debug!(member = %to.short(), "Error frame dropped");
        }
    }
}
