//! Reusable helpers for signaling integration tests.
//!
//! Everything runs in-process: a real [`SignalingServer`] over a
//! [`ChannelTransport`], and for client tests real [`MeshManager`]s driven
//! by the scripted engine and fake capture device from
//! `circle_signal::testing`. No sockets, no media stack.

#![allow(dead_code)]

use std::sync::Arc;

use circle_signal::media::LocalMediaController;
use circle_signal::mesh::{MeshConfig, MeshEvent, MeshManager};
use circle_signal::protocol::{CircleId, ClientMessage, MemberId, ServerMessage};
use circle_signal::server::{ServerConfig, SignalingServer};
use circle_signal::testing::{FakeCaptureDevice, ScriptedEngine};
use circle_signal::transport::ChannelTransport;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// A running server plus the transport it writes to.
pub struct TestServer {
    pub server: SignalingServer,
    pub transport: Arc<ChannelTransport>,
}

/// One connected client as the server sees it.
pub struct TestClient {
    pub id: MemberId,
    pub rx: UnboundedReceiver<ServerMessage>,
}

impl TestServer {
    /// Starts a server with default configuration.
    pub fn start() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Starts a server with `config`.
    pub fn with_config(config: ServerConfig) -> Self {
        let transport = Arc::new(ChannelTransport::new());
        let server = SignalingServer::new(config, transport.clone());
        server.start();
        Self { server, transport }
    }

    /// Connects a client with a fixed id and discards its welcome frame.
    pub fn connect(&self, name: &str) -> TestClient {
        let id = MemberId::from(name);
        let mut rx = self.transport.register(id.clone());
        self.server.connect(&id).expect("server is running");
        match rx.try_recv() {
            Ok(ServerMessage::Welcome { member_id }) => assert_eq!(member_id, id),
            other => panic!("expected welcome, got {other:?}"),
        }
        TestClient { id, rx }
    }

    /// Sends a client message on behalf of `client`.
    pub fn send(&self, client: &TestClient, msg: ClientMessage) {
        self.server
            .handle_message(&client.id, msg)
            .expect("server accepts message");
    }

    /// Joins `client` to `circle`.
    pub fn join(&self, client: &TestClient, circle: &str) {
        self.send(
            client,
            ClientMessage::JoinCircle {
                circle_id: CircleId::from(circle),
            },
        );
    }

    /// Creates a mesh client connected to this server.
    pub fn mesh_peer(&self, name: &str, device: FakeCaptureDevice) -> MeshPeer {
        self.mesh_peer_with_config(name, device, MeshConfig::default())
    }

    /// Creates a mesh client with a custom mesh configuration.
    pub fn mesh_peer_with_config(
        &self,
        name: &str,
        device: FakeCaptureDevice,
        config: MeshConfig,
    ) -> MeshPeer {
        let client = self.connect(name);
        let engine = Arc::new(ScriptedEngine::new());
        let device = Arc::new(device);
        let media = Arc::new(LocalMediaController::new(device.clone()));
        let (signal_tx, outbound) = mpsc::unbounded_channel();
        let (mesh, events) = MeshManager::new(
            client.id.clone(),
            config,
            engine.clone(),
            Arc::clone(&media),
            Arc::new(signal_tx),
        );
        MeshPeer {
            client,
            mesh,
            events,
            engine,
            device,
            media,
            outbound,
        }
    }
}

impl TestClient {
    /// Takes every frame received so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Takes every frame received so far and returns their wire tags.
    pub fn drain_types(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerMessage::msg_type).collect()
    }
}

/// A client running a real mesh manager.
pub struct MeshPeer {
    pub client: TestClient,
    pub mesh: MeshManager,
    pub events: UnboundedReceiver<MeshEvent>,
    pub engine: Arc<ScriptedEngine>,
    pub device: Arc<FakeCaptureDevice>,
    pub media: Arc<LocalMediaController>,
    outbound: UnboundedReceiver<ClientMessage>,
}

impl MeshPeer {
    /// The peer's member id.
    pub fn id(&self) -> &MemberId {
        &self.client.id
    }

    /// Takes every mesh event emitted so far.
    pub fn drain_events(&mut self) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Takes client frames queued but not yet delivered to the server.
    pub fn take_outbound(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }
}

/// Moves frames between the peers and the server until nothing is in flight.
pub async fn pump(server: &TestServer, peers: &mut [&mut MeshPeer]) {
    loop {
        let mut moved = 0;
        for peer in peers.iter_mut() {
            while let Ok(msg) = peer.outbound.try_recv() {
                server
                    .server
                    .handle_message(&peer.client.id, msg)
                    .expect("server accepts mesh frames");
                moved += 1;
            }
        }
        for peer in peers.iter_mut() {
            while let Ok(msg) = peer.client.rx.try_recv() {
                peer.mesh.handle_server_message(msg).await;
                moved += 1;
            }
        }
        if moved == 0 {
            break;
        }
    }
}
