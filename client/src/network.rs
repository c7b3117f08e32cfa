use crate::world::SharedWorld;
use log::{debug, info, warn};
use shared::transport::{
    decode_frame, encode_frame, SequenceCounter, CONNECT_RETRY_INTERVAL, DEFAULT_PEER_TIMEOUT,
};
use shared::{
    EncodeError, Frame, Identity, Message, SequenceFilter, WireFormat, DEFAULT_PORT,
    DEFAULT_TICKRATE, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Connecting,
    AwaitingIdentity,
    Syncing,
    Disconnected,
}

/// Why a session that did connect came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server closed the connection.
    ServerClosed,
    /// Nothing arrived from the server within the peer timeout.
    ServerTimedOut,
    /// Local process shutdown.
    Shutdown,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no connect acknowledgment from {addr} within {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode frame: {0}")]
    Frame(#[from] bincode::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} did not resolve to any address")]
    NoAddress(String),
}

/// Resolves a `host:port` server address such as `localhost:25566`,
/// preferring IPv4 results.
pub async fn resolve_server(host: &str) -> Result<SocketAddr, ClientError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(host)
        .await
        .map_err(|source| ClientError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ClientError::NoAddress(host.to_string()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub tickrate: u32,
    pub connect_timeout: Duration,
    pub peer_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Self::default()
        }
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis((1000 / u64::from(self.tickrate.max(1))).max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            tickrate: DEFAULT_TICKRATE,
            connect_timeout: Duration::from_secs(15),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        }
    }
}

/// Client half of the sync protocol: owns the socket, learns the local
/// identity, streams the local position up and snapshots down.
pub struct SyncAgent {
    socket: UdpSocket,
    config: ClientConfig,
    wire: WireFormat,
    state: SyncState,
    identity: Option<Identity>,
    inbound: SequenceFilter,
    outbound: SequenceCounter,
    last_heard: Instant,
}

impl SyncAgent {
    /// Opens a connection and waits for the server's acknowledgment,
    /// repeating the request until `connect_timeout` runs out.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let mut agent = Self::bind(config).await?;
        agent.handshake().await?;
        Ok(agent)
    }

    /// Binds a local socket aimed at the server. The agent starts in
    /// [`SyncState::Connecting`] and has sent nothing yet.
    pub async fn bind(config: ClientConfig) -> Result<Self, ClientError> {
        let bind_addr: SocketAddr = if config.server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(config.server_addr).await?;

        Ok(SyncAgent {
            socket,
            config,
            wire: WireFormat::default(),
            state: SyncState::Connecting,
            identity: None,
            inbound: SequenceFilter::new(),
            outbound: SequenceCounter::new(),
            last_heard: Instant::now(),
        })
    }

    /// Connecting → AwaitingIdentity. On timeout the agent is left
    /// Disconnected.
    pub async fn handshake(&mut self) -> Result<(), ClientError> {
        info!("Connecting to {}...", self.config.server_addr);

        let connect = encode_frame(&Frame::Connect {
            protocol_version: PROTOCOL_VERSION,
        })?;
        let deadline = Instant::now() + self.config.connect_timeout;
        let mut retry = interval(CONNECT_RETRY_INTERVAL);
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        let wire = loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    self.state = SyncState::Disconnected;
                    return Err(ClientError::ConnectTimeout {
                        addr: self.config.server_addr,
                        timeout: self.config.connect_timeout,
                    });
                },
                _ = retry.tick() => {
                    if let Err(e) = self.socket.send(&connect).await {
                        debug!("Connect attempt failed: {}", e);
                    }
                },
                result = self.socket.recv(&mut buffer) => match result {
                    Ok(len) => match decode_frame(&buffer[..len]) {
                        Ok(Frame::Accept { wire }) => break wire,
                        Ok(other) => debug!("Ignoring {:?} while connecting", other),
                        Err(e) => warn!("Dropping malformed datagram: {}", e),
                    },
                    Err(e) => debug!("Receive failed while connecting: {}", e),
                },
            }
        };

        info!("Got a connection! ({} wire format)", wire);
        self.wire = wire;
        self.state = SyncState::AwaitingIdentity;
        self.last_heard = Instant::now();
        Ok(())
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Syncs until the server goes away or Ctrl-C is pressed.
    pub async fn run(&mut self, world: &SharedWorld) -> Result<SessionEnd, ClientError> {
        self.run_until(world, async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handling available; only the server can end us
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Syncs until the server goes away or `shutdown` completes. On
    /// shutdown the server is told we are leaving.
    pub async fn run_until<F>(
        &mut self,
        world: &SharedWorld,
        shutdown: F,
    ) -> Result<SessionEnd, ClientError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut tick = interval(self.config.tick_duration());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut retry = interval(CONNECT_RETRY_INTERVAL);
        retry.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        let end = loop {
            tokio::select! {
                result = self.socket.recv(&mut buffer) => match result {
                    Ok(len) => {
                        if let Some(end) = self.handle_datagram(&buffer[..len], world) {
                            break end;
                        }
                    }
                    Err(e) => debug!("Error receiving packet: {}", e),
                },

                _ = tick.tick() => {
                    if self.last_heard.elapsed() > self.config.peer_timeout {
                        warn!("Server silent for {:?}", self.config.peer_timeout);
                        break SessionEnd::ServerTimedOut;
                    }
                    if self.state == SyncState::Syncing {
                        if let Err(e) = self.send_position(world).await {
                            warn!("Error sending position: {}", e);
                        }
                    }
                },

                // Our assignment may have been lost; asking again is harmless
                _ = retry.tick(), if self.state == SyncState::AwaitingIdentity => {
                    self.send_frame(&Frame::Connect { protocol_version: PROTOCOL_VERSION }).await?;
                },

                _ = &mut shutdown => {
                    if let Err(e) = self.send_frame(&Frame::Disconnect).await {
                        debug!("Failed to notify server of disconnect: {}", e);
                    }
                    break SessionEnd::Shutdown;
                },
            }
        };

        self.state = SyncState::Disconnected;
        world.mark_disconnected();
        info!("Disconnected: {:?}", end);
        Ok(end)
    }

    fn handle_datagram(&mut self, bytes: &[u8], world: &SharedWorld) -> Option<SessionEnd> {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed datagram: {}", e);
                return None;
            }
        };
        self.last_heard = Instant::now();

        match frame {
            Frame::Payload { sequence, data } => {
                if !self.inbound.accept(sequence) {
                    debug!("Dropping stale payload {}", sequence);
                    return None;
                }
                match self.wire.decode(&data) {
                    Ok(message) => self.handle_message(message, world),
                    Err(e) => warn!("Dropping malformed packet: {}", e),
                }
                None
            }
            Frame::Disconnect => {
                info!("Server closed the connection");
                Some(SessionEnd::ServerClosed)
            }
            Frame::Accept { .. } => None,
            Frame::Connect { .. } => {
                warn!("Unexpected connect frame from server");
                None
            }
        }
    }

    fn handle_message(&mut self, message: Message, world: &SharedWorld) {
        match message {
            Message::IdentityAssignment { identity } => match self.identity {
                None => {
                    info!("Assigned identity {}", identity);
                    self.identity = Some(identity);
                    self.state = SyncState::Syncing;
                    world.assign_identity(identity);
                }
                Some(current) if current == identity => {}
                Some(current) => warn!(
                    "Ignoring reassignment from {} to {}",
                    current, identity
                ),
            },
            Message::Snapshot { entities } => world.apply_snapshot(&entities),
            Message::PositionUpdate { .. } => {
                warn!("Unexpected position update from server");
            }
        }
    }

    async fn send_position(&mut self, world: &SharedWorld) -> Result<(), ClientError> {
        let (Some(identity), Some(local)) = (self.identity, world.local_position()) else {
            return Ok(());
        };
        let message = Message::PositionUpdate {
            identity,
            x: local.x,
            y: local.y,
        };
        let data = self.wire.encode(&message)?;
        let frame = Frame::Payload {
            sequence: self.outbound.next_sequence(),
            data,
        };
        self.send_frame(&frame).await
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let bytes = encode_frame(frame)?;
        if let Err(e) = self.socket.send(&bytes).await {
            // ICMP errors from a vanished server surface here; the peer
            // timeout decides when to give up
            debug!("Send failed: {}", e);
        }
        Ok(())
    }
}

/// Runs a [`SyncAgent`] on its own OS thread with a dedicated runtime, so
/// the caller's thread stays free for rendering and input.
pub fn spawn_network_thread(
    config: ClientConfig,
    world: SharedWorld,
) -> io::Result<thread::JoinHandle<Result<SessionEnd, ClientError>>> {
    thread::Builder::new()
        .name("network".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async move {
                let mut agent = SyncAgent::connect(config).await?;
                agent.run(&world).await
            })
        })
}
