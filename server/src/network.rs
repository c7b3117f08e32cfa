//! Server tick loop: poll the transport, apply the events, broadcast one
//! snapshot to every registered peer

use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::store::EntityStore;
use crate::transport::{PeerId, TransportError, TransportEvent, UdpHost};
use log::{debug, error, info, warn};
use shared::{Message, WireFormat};
use std::net::SocketAddr;

/// Phase the tick loop is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Mutating,
    Broadcasting,
}

/// What one pass through the loop did, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub tick: u64,
    pub events: usize,
    pub entities: usize,
    pub recipients: usize,
}

/// Main server owning the transport and all authoritative state
pub struct Server {
    host: UdpHost,
    registry: ConnectionRegistry,
    store: EntityStore,
    config: ServerConfig,
    state: LoopState,
    tick: u64,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let host = UdpHost::bind(config.bind_addr, config.max_clients as usize, config.wire)
            .await?
            .with_peer_timeout(config.peer_timeout);
        info!("Server listening on {}", host.local_addr()?);
        info!(
            "Max clients {}, tickrate {} ({}ms poll budget), {} wire format",
            config.max_clients,
            config.tickrate,
            config.poll_budget().as_millis(),
            config.wire
        );

        Ok(Server {
            host,
            registry: ConnectionRegistry::new(config.max_clients),
            store: EntityStore::new(),
            config,
            state: LoopState::Idle,
            tick: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.host.local_addr()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Runs ticks until the process is interrupted.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Server started successfully");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.tick() => {
                    let report = result?;
                    if report.tick % 256 == 0 && report.entities > 0 {
                        debug!(
                            "Tick {}: {} entities, {} recipients",
                            report.tick, report.entities, report.recipients
                        );
                    }
                },
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One Polling → Mutating → Broadcasting pass.
    pub async fn tick(&mut self) -> Result<TickReport, TransportError> {
        self.state = LoopState::Polling;
        let events = self.host.service(self.config.poll_budget()).await?;
        let event_count = events.len();

        self.state = LoopState::Mutating;
        for event in events {
            self.handle_event(event).await;
        }
        self.store.sweep_removed();

        self.state = LoopState::Broadcasting;
        let recipients = self.broadcast_snapshot().await;

        self.state = LoopState::Polling;
        self.tick += 1;

        Ok(TickReport {
            tick: self.tick,
            events: event_count,
            entities: self.store.len(),
            recipients,
        })
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect(peer) => self.handle_connect(peer).await,
            TransportEvent::Receive { peer, data } => self.handle_receive(peer, &data),
            TransportEvent::Disconnect { peer, reason } => {
                match self.registry.on_disconnect(peer) {
                    Some(identity) => {
                        self.store.mark_removed(identity);
                        info!(
                            "Entity {} left ({:?}), {} connected",
                            identity,
                            reason,
                            self.registry.len()
                        );
                    }
                    None => debug!("Disconnect from unregistered peer {}", peer),
                }
            }
        }
    }

    async fn handle_connect(&mut self, peer: PeerId) {
        // Repeated connect: the client probably lost its assignment
        if let Some(identity) = self.registry.resolve(peer) {
            debug!("Re-sending identity {} to {}", identity, peer);
            self.send_message(peer, &Message::IdentityAssignment { identity })
                .await;
            return;
        }

        match self.registry.on_connect(peer) {
            Ok(identity) => {
                self.store.create(identity);
                self.send_message(peer, &Message::IdentityAssignment { identity })
                    .await;
                info!(
                    "Entity {} joined, {} connected",
                    identity,
                    self.registry.len()
                );
            }
            Err(e) => {
                warn!("Rejecting {}: {}", peer, e);
                self.host.disconnect_now(peer).await;
            }
        }
    }

    fn handle_receive(&mut self, peer: PeerId, data: &[u8]) {
        let Some(owner) = self.registry.resolve(peer) else {
            debug!("Dropping packet from unregistered peer {}", peer);
            return;
        };

        match self.config.wire.decode(data) {
            Ok(Message::PositionUpdate { identity, x, y }) => {
                if identity != owner {
                    warn!(
                        "Peer {} owns entity {} but sent an update for {}",
                        peer, owner, identity
                    );
                    return;
                }
                self.store.apply_update(identity, (x, y));
            }
            Ok(other) => warn!("Unexpected {} from {}", other.kind(), peer),
            Err(e) => warn!("Dropping malformed packet from {}: {}", peer, e),
        }
    }

    async fn send_message(&mut self, peer: PeerId, message: &Message) {
        let bytes = match self.config.wire.encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {}: {}", message.kind(), e);
                return;
            }
        };
        if let Err(e) = self.host.send(peer, &bytes).await {
            warn!("Failed to send {} to {}: {}", message.kind(), peer, e);
        }
    }

    /// Encodes one snapshot and sends the same bytes to every registered
    /// peer. Returns how many sends succeeded.
    async fn broadcast_snapshot(&mut self) -> usize {
        if self.registry.is_empty() {
            return 0;
        }

        let snapshot = Message::Snapshot {
            entities: self.store.snapshot(),
        };
        let bytes = match self.config.wire.encode(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                return 0;
            }
        };

        let peers: Vec<PeerId> = self.registry.peers().collect();
        let mut sent = 0;
        for peer in peers {
            match self.host.send(peer, &bytes).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to send snapshot to {}: {}", peer, e),
            }
        }
        sent
    }

    pub fn wire(&self) -> WireFormat {
        self.config.wire
    }
}
