//! In-process transport backed by unbounded Tokio channels.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use super::error::{TransportError, TransportResult};
use super::Transport;
use crate::protocol::{MemberId, ServerMessage};

/// Transport that hands frames to per-member unbounded channels.
///
/// A socket host registers each accepted connection and pumps the returned
/// receiver into the socket; tests read the receiver directly.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    connections: RwLock<HashMap<MemberId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl ChannelTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `member` and returns its outbound stream.
    ///
    /// Registering the same member again replaces the previous connection,
    /// whose stream then ends.
    pub fn register(&self, member: MemberId) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member, tx);
        rx
    }

    /// Returns whether `member` has a registered connection.
    #[must_use]
    pub fn is_connected(&self, member: &MemberId) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(member)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, to: &MemberId, msg: ServerMessage) -> TransportResult<()> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = connections
            .get(to)
            .ok_or_else(|| TransportError::Dropped(to.clone()))?;
        tx.send(msg).map_err(|_| {
            debug!(member = %to.short(), "Receiver gone, dropping frame");
            TransportError::Dropped(to.clone())
        })
    }

    fn close(&self, member: &MemberId) {
        let removed = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(member);
        if removed.is_some() {
            debug!(member = %member.short(), "Connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CircleId;

    fn left(member: &str) -> ServerMessage {
        ServerMessage::MemberLeft {
            circle_id: CircleId::from("room1"),
            member_id: MemberId::from(member),
        }
    }

    #[test]
    fn send_to_registered_member_is_delivered_in_order() {
        let transport = ChannelTransport::new();
        let bob = MemberId::from("bob");
        let mut rx = transport.register(bob.clone());

        transport.send(&bob, left("a")).unwrap();
        transport.send(&bob, left("b")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), left("a"));
        assert_eq!(rx.try_recv().unwrap(), left("b"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_to_unknown_member_is_dropped() {
        let transport = ChannelTransport::new();
        let result = transport.send(&MemberId::from("ghost"), left("a"));
        assert_eq!(result, Err(TransportError::Dropped(MemberId::from("ghost"))));
    }

    #[test]
    fn send_after_receiver_dropped_is_dropped() {
        let transport = ChannelTransport::new();
        let bob = MemberId::from("bob");
        drop(transport.register(bob.clone()));

        assert!(!transport.is_connected(&bob));
        assert!(matches!(
            transport.send(&bob, left("a")),
            Err(TransportError::Dropped(_))
        ));
    }

    #[test]
    fn close_removes_connection_and_ends_stream() {
        let transport = ChannelTransport::new();
        let bob = MemberId::from("bob");
        let mut rx = transport.register(bob.clone());

        transport.close(&bob);

        assert_eq!(transport.connection_count(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn re_register_replaces_connection() {
        let transport = ChannelTransport::new();
        let bob = MemberId::from("bob");
        let mut old = transport.register(bob.clone());
        let mut new = transport.register(bob.clone());

        transport.send(&bob, left("a")).unwrap();

        assert!(old.try_recv().is_err());
        assert_eq!(new.try_recv().unwrap(), left("a"));
        assert_eq!(transport.connection_count(), 1);
    }
}
