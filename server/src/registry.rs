//! Peer ↔ identity bookkeeping for the sync server
//!
//! The registry owns the [`IdentityPool`] and keeps the peer → identity and
//! identity → peer maps in lockstep, so while a connection is open the
//! association is a bijection. It is only ever touched from the tick loop.

use crate::identity::{IdentityPool, PoolError};
use crate::transport::PeerId;
use log::{info, warn};
use shared::Identity;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cannot admit peer {peer}: {source}")]
    Admission {
        peer: PeerId,
        #[source]
        source: PoolError,
    },
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    pool: IdentityPool,
    by_peer: HashMap<PeerId, Identity>,
    by_identity: HashMap<Identity, PeerId>,
}

impl ConnectionRegistry {
    pub fn new(max_clients: u8) -> Self {
        Self {
            pool: IdentityPool::new(max_clients),
            by_peer: HashMap::new(),
            by_identity: HashMap::new(),
        }
    }

    /// Allocates an identity for `peer` and records the association.
    ///
    /// A peer that is already registered keeps its identity; nothing new is
    /// allocated for it.
    pub fn on_connect(&mut self, peer: PeerId) -> Result<Identity, RegistryError> {
        if let Some(existing) = self.by_peer.get(&peer) {
            return Ok(*existing);
        }

        let identity = self
            .pool
            .allocate()
            .map_err(|source| RegistryError::Admission { peer, source })?;

        self.by_peer.insert(peer, identity);
        self.by_identity.insert(identity, peer);
        info!("Peer {} registered as identity {}", peer, identity);
        Ok(identity)
    }

    /// Removes `peer` and returns its identity to the pool.
    ///
    /// Returns `None` for a peer that is not registered, which makes a second
    /// disconnect for the same peer harmless.
    pub fn on_disconnect(&mut self, peer: PeerId) -> Option<Identity> {
        let identity = self.by_peer.remove(&peer)?;
        self.by_identity.remove(&identity);

        if let Err(e) = self.pool.release(identity) {
            warn!("Releasing identity {} for peer {}: {}", identity, peer, e);
        }
        info!("Peer {} released identity {}", peer, identity);
        Some(identity)
    }

    pub fn resolve(&self, peer: PeerId) -> Option<Identity> {
        self.by_peer.get(&peer).copied()
    }

    pub fn peer_of(&self, identity: Identity) -> Option<PeerId> {
        self.by_identity.get(&identity).copied()
    }

    pub fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.by_peer.keys().copied()
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }
}
