//! UDP host that turns datagrams into connection events
//!
//! A background task reads the socket and forwards raw datagrams over a
//! channel; the tick loop calls [`UdpHost::service`] to drain them. Each call
//! waits at most the given budget for the first datagram, then drains whatever
//! else is already queued without waiting again.

use log::{debug, info, warn};
use shared::transport::{decode_frame, encode_frame, SequenceCounter, DEFAULT_PEER_TIMEOUT};
use shared::{Frame, SequenceFilter, WireFormat, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Transport-level handle for one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(SocketAddr);

impl PeerId {
    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        PeerId(addr)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer sent an orderly `Disconnect`.
    Requested,
    /// Nothing was heard from the peer within the timeout.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer completed the handshake. Also raised again when an already
    /// connected peer repeats its `Connect`.
    Connect(PeerId),
    Receive { peer: PeerId, data: Vec<u8> },
    Disconnect { peer: PeerId, reason: DisconnectReason },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] bincode::Error),
    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),
    #[error("socket receiver task stopped")]
    ReceiverClosed,
}

#[derive(Debug)]
struct PeerState {
    last_seen: Instant,
    inbound: SequenceFilter,
    outbound: SequenceCounter,
}

impl PeerState {
    fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            inbound: SequenceFilter::new(),
            outbound: SequenceCounter::new(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

pub struct UdpHost {
    socket: Arc<UdpSocket>,
    inbound_rx: mpsc::UnboundedReceiver<(Vec<u8>, SocketAddr)>,
    receiver: JoinHandle<()>,
    peers: HashMap<PeerId, PeerState>,
    max_peers: usize,
    wire: WireFormat,
    peer_timeout: Duration,
}

impl UdpHost {
    pub async fn bind(
        addr: SocketAddr,
        max_peers: usize,
        wire: WireFormat,
    ) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let receiver = Self::spawn_network_receiver(Arc::clone(&socket), inbound_tx);

        Ok(Self {
            socket,
            inbound_rx,
            receiver,
            peers: HashMap::new(),
            max_peers,
            wire,
            peer_timeout: DEFAULT_PEER_TIMEOUT,
        })
    }

    pub fn with_peer_timeout(mut self, peer_timeout: Duration) -> Self {
        self.peer_timeout = peer_timeout;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(
        socket: Arc<UdpSocket>,
        inbound_tx: mpsc::UnboundedSender<(Vec<u8>, SocketAddr)>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if inbound_tx.send((buffer[..len].to_vec(), addr)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Collects every pending transport event.
    ///
    /// Waits up to `budget` for the first datagram and never longer, then
    /// drains the queue. Peers that have been silent for too long are
    /// reported as disconnected before anything else.
    pub async fn service(&mut self, budget: Duration) -> Result<Vec<TransportEvent>, TransportError> {
        let mut events = self.expire_silent_peers();

        if events.is_empty() {
            match timeout(budget, self.inbound_rx.recv()).await {
                Ok(Some((bytes, addr))) => self.ingest(&bytes, addr, &mut events).await,
                Ok(None) => return Err(TransportError::ReceiverClosed),
                Err(_) => return Ok(events),
            }
        }

        while let Ok((bytes, addr)) = self.inbound_rx.try_recv() {
            self.ingest(&bytes, addr, &mut events).await;
        }

        Ok(events)
    }

    async fn ingest(&mut self, bytes: &[u8], addr: SocketAddr, events: &mut Vec<TransportEvent>) {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed datagram from {}: {}", addr, e);
                return;
            }
        };
        let peer = PeerId(addr);

        match frame {
            Frame::Connect { protocol_version } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "Ignoring connect from {} with protocol version {} (expected {})",
                        addr, protocol_version, PROTOCOL_VERSION
                    );
                    return;
                }

                if let Some(state) = self.peers.get_mut(&peer) {
                    // Either a retry before any payload or a restarted client
                    // on the same address; both number payloads from zero
                    state.touch();
                    state.inbound = SequenceFilter::new();
                } else if self.peers.len() >= self.max_peers {
                    warn!(
                        "Peer limit of {} reached, ignoring connect from {}",
                        self.max_peers, addr
                    );
                    return;
                } else {
                    info!("A new client connected from {}", addr);
                    self.peers.insert(peer, PeerState::new());
                }

                if let Err(e) = self.send_frame(addr, &Frame::Accept { wire: self.wire }).await {
                    warn!("Failed to acknowledge connect from {}: {}", addr, e);
                }
                events.push(TransportEvent::Connect(peer));
            }

            Frame::Payload { sequence, data } => match self.peers.get_mut(&peer) {
                Some(state) => {
                    if state.inbound.accept(sequence) {
                        state.touch();
                        events.push(TransportEvent::Receive { peer, data });
                    } else {
                        debug!("Dropping stale payload {} from {}", sequence, addr);
                    }
                }
                None => debug!("Dropping payload from unconnected {}", addr),
            },

            Frame::Disconnect => {
                if self.peers.remove(&peer).is_some() {
                    info!("Client {} disconnected", addr);
                    events.push(TransportEvent::Disconnect {
                        peer,
                        reason: DisconnectReason::Requested,
                    });
                }
            }

            Frame::Accept { .. } => {
                warn!("Unexpected accept frame from {}", addr);
            }
        }
    }

    fn expire_silent_peers(&mut self) -> Vec<TransportEvent> {
        let timed_out: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, state)| state.last_seen.elapsed() > self.peer_timeout)
            .map(|(peer, _)| *peer)
            .collect();

        timed_out
            .into_iter()
            .map(|peer| {
                self.peers.remove(&peer);
                info!("Client {} timed out", peer);
                TransportEvent::Disconnect {
                    peer,
                    reason: DisconnectReason::TimedOut,
                }
            })
            .collect()
    }

    /// Sends one application payload to a connected peer.
    pub async fn send(&mut self, peer: PeerId, data: &[u8]) -> Result<(), TransportError> {
        let state = self
            .peers
            .get_mut(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let frame = Frame::Payload {
            sequence: state.outbound.next_sequence(),
            data: data.to_vec(),
        };
        self.send_frame(peer.addr(), &frame).await
    }

    /// Drops a peer without raising a disconnect event and tells it so.
    pub async fn disconnect_now(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_none() {
            return;
        }
        if let Err(e) = self.send_frame(peer.addr(), &Frame::Disconnect).await {
            debug!("Failed to notify {} of disconnect: {}", peer, e);
        }
    }

    async fn send_frame(&self, addr: SocketAddr, frame: &Frame) -> Result<(), TransportError> {
        let bytes = encode_frame(frame)?;
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }
}

impl Drop for UdpHost {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}
