//! Integration tests for the sync server and its clients
//!
//! Every test runs a real server on an ephemeral port and talks to it over
//! UDP, either through hand-driven sockets or through the client library.

use assert_approx_eq::assert_approx_eq;
use client::network::{spawn_network_thread, ClientConfig, ClientError, SessionEnd, SyncAgent, SyncState};
use client::world::SharedWorld;
use server::config::ServerConfig;
use server::network::Server;
use shared::transport::{decode_frame, encode_frame};
use shared::{
    EntityState, Frame, Identity, Message, SequenceCounter, SequenceFilter, WireFormat,
    MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(3);

fn server_config(max_clients: u8, wire: WireFormat) -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        max_clients,
        tickrate: 100,
        wire,
        ..ServerConfig::default()
    }
}

/// Starts a server ticking in the background and returns its address.
async fn start_server(config: ServerConfig) -> (SocketAddr, JoinHandle<()>) {
    let mut server = Server::new(config).await.expect("server failed to start");
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        loop {
            if let Err(e) = server.tick().await {
                panic!("server tick failed: {e}");
            }
        }
    });
    (addr, handle)
}

/// Speaks the frame protocol by hand so tests can control every datagram.
struct RawClient {
    socket: UdpSocket,
    wire: WireFormat,
    inbound: SequenceFilter,
    outbound: SequenceCounter,
}

impl RawClient {
    async fn bind(server: SocketAddr) -> Self {
        Self::bind_at("127.0.0.1:0".parse().unwrap(), server).await
    }

    async fn bind_at(local: SocketAddr, server: SocketAddr) -> Self {
        let socket = UdpSocket::bind(local).await.unwrap();
        socket.connect(server).await.unwrap();
        RawClient {
            socket,
            wire: WireFormat::default(),
            inbound: SequenceFilter::new(),
            outbound: SequenceCounter::new(),
        }
    }

    async fn connect(server: SocketAddr) -> Self {
        Self::bind(server).await.handshaken().await
    }

    async fn handshaken(mut self) -> Self {
        self.wire = self
            .handshake(PROTOCOL_VERSION, WAIT)
            .await
            .expect("server never accepted");
        self
    }

    async fn send_frame(&self, frame: &Frame) {
        self.socket.send(&encode_frame(frame).unwrap()).await.unwrap();
    }

    async fn recv_frame(&self, within: Duration) -> Option<Frame> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        match timeout(within, self.socket.recv(&mut buf)).await {
            Ok(Ok(len)) => Some(decode_frame(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    /// Sends `Connect` and waits for `Accept`, returning the announced wire
    /// format.
    async fn handshake(&self, protocol_version: u32, within: Duration) -> Option<WireFormat> {
        self.send_frame(&Frame::Connect { protocol_version }).await;
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            match self.recv_frame(deadline - Instant::now()).await {
                Some(Frame::Accept { wire }) => return Some(wire),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    async fn send_update(&mut self, identity: Identity, x: f32, y: f32) {
        let data = self
            .wire
            .encode(&Message::PositionUpdate { identity, x, y })
            .unwrap();
        let sequence = self.outbound.next_sequence();
        self.send_frame(&Frame::Payload { sequence, data }).await;
    }

    async fn next_message(&mut self) -> Message {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .expect("no message before deadline");
            match self.recv_frame(remaining).await {
                Some(Frame::Payload { sequence, data }) if self.inbound.accept(sequence) => {
                    return self.wire.decode(&data).unwrap();
                }
                Some(_) => continue,
                None => panic!("no message before deadline"),
            }
        }
    }

    async fn expect_identity(&mut self) -> Identity {
        loop {
            if let Message::IdentityAssignment { identity } = self.next_message().await {
                return identity;
            }
        }
    }

    /// Reads snapshots until one satisfies `done`.
    async fn snapshot_where<F>(&mut self, done: F) -> Vec<EntityState>
    where
        F: Fn(&[EntityState]) -> bool,
    {
        loop {
            if let Message::Snapshot { entities } = self.next_message().await {
                if done(&entities) {
                    return entities;
                }
            }
        }
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Join, move, leave and rejoin over real sockets
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn two_clients_join_update_and_leave() {
        let (addr, server) = start_server(server_config(2, WireFormat::Binary)).await;

        let mut a = RawClient::connect(addr).await;
        assert_eq!(a.expect_identity().await, Identity(0));
        let mut b = RawClient::connect(addr).await;
        assert_eq!(b.expect_identity().await, Identity(1));

        a.send_update(Identity(0), 1.0, 2.0).await;
        let snapshot = b
            .snapshot_where(|s| s.len() == 2 && s[0].position() == (1.0, 2.0))
            .await;
        assert_eq!(snapshot[0], EntityState::new(Identity(0), 1.0, 2.0));
        assert_eq!(snapshot[1], EntityState::new(Identity(1), 0.0, 0.0));

        a.send_frame(&Frame::Disconnect).await;
        let snapshot = b.snapshot_where(|s| s.len() == 1).await;
        assert_eq!(snapshot, vec![EntityState::new(Identity(1), 0.0, 0.0)]);

        // The released identity is handed out again
        let mut c = RawClient::connect(addr).await;
        assert_eq!(c.expect_identity().await, Identity(0));
        let snapshot = c.snapshot_where(|s| s.len() == 2).await;
        assert_eq!(snapshot[0], EntityState::new(Identity(0), 0.0, 0.0));

        server.abort();
    }

    #[tokio::test]
    async fn repeated_connect_keeps_identity() {
        let (addr, server) = start_server(server_config(4, WireFormat::Binary)).await;

        let mut a = RawClient::connect(addr).await;
        assert_eq!(a.expect_identity().await, Identity(0));

        assert!(a.handshake(PROTOCOL_VERSION, WAIT).await.is_some());
        assert_eq!(a.expect_identity().await, Identity(0));

        let mut b = RawClient::connect(addr).await;
        assert_eq!(b.expect_identity().await, Identity(1));

        server.abort();
    }

    #[tokio::test]
    async fn restarted_client_on_same_address_can_move() {
        let (addr, server) = start_server(server_config(2, WireFormat::Binary)).await;

        let mut a = RawClient::connect(addr).await;
        let identity = a.expect_identity().await;
        for i in 0..40 {
            a.send_update(identity, i as f32, 0.0).await;
        }
        let local = a.socket.local_addr().unwrap();
        // Crash without saying goodbye
        drop(a);

        let mut restarted = RawClient::bind_at(local, addr).await.handshaken().await;
        assert_eq!(restarted.expect_identity().await, identity);
        restarted.send_update(identity, 123.0, 456.0).await;

        let snapshot = restarted
            .snapshot_where(|s| s.iter().any(|e| e.position() == (123.0, 456.0)))
            .await;
        assert_eq!(snapshot, vec![EntityState::new(identity, 123.0, 456.0)]);

        server.abort();
    }

    #[tokio::test]
    async fn forged_update_is_ignored() {
        let (addr, server) = start_server(server_config(2, WireFormat::Binary)).await;

        let mut a = RawClient::connect(addr).await;
        a.expect_identity().await;
        let mut b = RawClient::connect(addr).await;
        b.expect_identity().await;

        // A claims B's entity, then moves its own
        a.send_update(Identity(1), 50.0, 50.0).await;
        a.send_update(Identity(0), 3.0, 3.0).await;

        let snapshot = b
            .snapshot_where(|s| s.len() == 2 && s[0].position() == (3.0, 3.0))
            .await;
        assert_eq!(snapshot[1], EntityState::new(Identity(1), 0.0, 0.0));

        server.abort();
    }

    #[tokio::test]
    async fn silent_client_is_expired() {
        let config = ServerConfig {
            peer_timeout: Duration::from_millis(300),
            ..server_config(2, WireFormat::Binary)
        };
        let (addr, server) = start_server(config).await;

        let mut a = RawClient::connect(addr).await;
        a.expect_identity().await;
        let mut b = RawClient::connect(addr).await;
        let b_id = b.expect_identity().await;

        // Only B keeps talking
        let deadline = Instant::now() + WAIT;
        let mut expired = false;
        while Instant::now() < deadline {
            b.send_update(b_id, 0.5, 0.5).await;
            if let Message::Snapshot { entities } = b.next_message().await {
                if entities.len() == 1 {
                    assert_eq!(entities[0].identity, b_id);
                    expired = true;
                    break;
                }
            }
        }
        assert!(expired);

        server.abort();
    }
}

/// Transport edge cases: garbage, bad versions, full server
mod transport_tests {
    use super::*;

    #[tokio::test]
    async fn malformed_datagrams_do_not_stop_the_server() {
        let (addr, server) = start_server(server_config(2, WireFormat::Binary)).await;

        let garbage = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for junk in [&b"hello"[..], &[0xff; 64][..], &[][..]] {
            garbage.send_to(junk, addr).await.unwrap();
        }

        let mut a = RawClient::connect(addr).await;
        assert_eq!(a.expect_identity().await, Identity(0));

        // A payload that is a valid frame but not a valid message
        let sequence = a.outbound.next_sequence();
        a.send_frame(&Frame::Payload {
            sequence,
            data: vec![0xde, 0xad, 0xbe, 0xef],
        })
        .await;
        a.send_update(Identity(0), 7.0, 8.0).await;

        let snapshot = a.snapshot_where(|s| s[0].position() == (7.0, 8.0)).await;
        assert_eq!(snapshot.len(), 1);

        server.abort();
    }

    #[tokio::test]
    async fn protocol_version_mismatch_is_ignored() {
        let (addr, server) = start_server(server_config(2, WireFormat::Binary)).await;

        let stranger = RawClient::bind(addr).await;
        let accepted = stranger
            .handshake(PROTOCOL_VERSION + 1, Duration::from_millis(300))
            .await;
        assert!(accepted.is_none());

        server.abort();
    }

    #[tokio::test]
    async fn full_server_ignores_extra_connects() {
        let (addr, server) = start_server(server_config(1, WireFormat::Binary)).await;

        let mut a = RawClient::connect(addr).await;
        assert_eq!(a.expect_identity().await, Identity(0));

        let late = RawClient::bind(addr).await;
        assert!(late
            .handshake(PROTOCOL_VERSION, Duration::from_millis(300))
            .await
            .is_none());

        server.abort();
    }

    #[tokio::test]
    async fn text_wire_format_end_to_end() {
        let (addr, server) = start_server(server_config(2, WireFormat::Text)).await;

        let mut a = RawClient::connect(addr).await;
        assert_eq!(a.wire, WireFormat::Text);

        // The first payload is the assignment, as plain text
        let data = loop {
            match a.recv_frame(WAIT).await {
                Some(Frame::Payload { data, .. }) => break data,
                Some(_) => continue,
                None => panic!("no assignment"),
            }
        };
        assert_eq!(data, b"A 0");

        a.send_frame(&Frame::Payload {
            sequence: 0,
            data: b"U 0 1.500000 -2.000000".to_vec(),
        })
        .await;

        let snapshot = a.snapshot_where(|s| s[0].position() == (1.5, -2.0)).await;
        assert_eq!(snapshot, vec![EntityState::new(Identity(0), 1.5, -2.0)]);

        server.abort();
    }
}

/// The client library against a live server
mod client_tests {
    use super::*;

    fn client_config(addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            tickrate: 50,
            connect_timeout: Duration::from_secs(2),
            ..ClientConfig::new(addr)
        }
    }

    async fn spawn_agent(
        addr: SocketAddr,
        world: SharedWorld,
    ) -> (
        oneshot::Sender<()>,
        JoinHandle<Result<SessionEnd, ClientError>>,
    ) {
        let mut agent = assert_ok!(SyncAgent::connect(client_config(addr)).await);
        assert_eq!(agent.state(), SyncState::AwaitingIdentity);

        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            agent
                .run_until(&world, async {
                    let _ = stopped.await;
                })
                .await
        });
        (stop, handle)
    }

    #[tokio::test]
    async fn agents_see_each_other() {
        let (addr, server) = start_server(server_config(4, WireFormat::Binary)).await;

        let world_a = SharedWorld::new();
        world_a.set_local_velocity((0.25, 0.125));
        world_a.integrate(1.0);
        let world_b = SharedWorld::new();

        let (stop_a, agent_a) = spawn_agent(addr, world_a.clone()).await;
        assert!(wait_until(|| world_a.local_position().is_some()).await);
        let (stop_b, agent_b) = spawn_agent(addr, world_b.clone()).await;

        let a_id = world_a.local_position().unwrap().identity;
        assert!(
            wait_until(|| world_b
                .entities()
                .iter()
                .any(|e| e.identity == a_id && e.position() == (0.25, 0.125)))
            .await
        );
        let seen = world_b
            .entities()
            .into_iter()
            .find(|e| e.identity == a_id)
            .unwrap();
        assert_approx_eq!(seen.x, 0.25);
        assert_approx_eq!(seen.y, 0.125);

        // A leaves; B stops seeing it
        stop_a.send(()).unwrap();
        assert_eq!(assert_ok!(agent_a.await.unwrap()), SessionEnd::Shutdown);
        assert!(!world_a.is_connected());
        assert!(wait_until(|| world_b.entities().len() == 1).await);

        stop_b.send(()).unwrap();
        assert_eq!(assert_ok!(agent_b.await.unwrap()), SessionEnd::Shutdown);
        server.abort();
    }

    #[tokio::test]
    async fn server_shutdown_ends_session() {
        let config = ServerConfig {
            peer_timeout: Duration::from_secs(10),
            ..server_config(2, WireFormat::Text)
        };
        let (addr, server) = start_server(config).await;

        let world = SharedWorld::new();
        let mut agent = assert_ok!(
            SyncAgent::connect(ClientConfig {
                peer_timeout: Duration::from_millis(400),
                ..client_config(addr)
            })
            .await
        );
        let session = {
            let world = world.clone();
            tokio::spawn(async move {
                let end = agent.run_until(&world, std::future::pending()).await;
                (agent.identity(), end)
            })
        };

        assert!(wait_until(|| world.is_connected()).await);
        server.abort();

        let (identity, end) = session.await.unwrap();
        assert_eq!(identity, Some(Identity(0)));
        assert_eq!(assert_ok!(end), SessionEnd::ServerTimedOut);
        assert!(!world.is_connected());
    }

    #[test]
    fn network_thread_reports_connect_timeout() {
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ClientConfig {
            connect_timeout: Duration::from_millis(300),
            ..ClientConfig::new(silent.local_addr().unwrap())
        };

        let handle = spawn_network_thread(config, SharedWorld::new()).unwrap();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(ClientError::ConnectTimeout { .. })));
    }
}
