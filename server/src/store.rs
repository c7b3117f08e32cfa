//! Authoritative entity state, mutated only by the tick loop

use log::{debug, info, warn};
use shared::{EntityState, Identity, SPAWN_POSITION};
use std::collections::BTreeMap;

/// Server-side record of one connected player's entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub identity: Identity,
    pub position: (f32, f32),
    /// Cleared when the owning connection goes away; the entity is then
    /// excluded from snapshots until the next sweep erases it.
    pub alive: bool,
}

impl Entity {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            position: SPAWN_POSITION,
            alive: true,
        }
    }

    pub fn state(&self) -> EntityState {
        EntityState::new(self.identity, self.position.0, self.position.1)
    }
}

/// Identity → entity map. Iteration order, and therefore snapshot order, is
/// ascending identity.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<Identity, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a fresh entity for `identity`, replacing anything left over
    /// under that identity (a same-tick disconnect that has not been swept).
    pub fn create(&mut self, identity: Identity) -> &Entity {
        let entity = Entity::new(identity);
        info!(
            "Spawned entity {} at ({}, {})",
            identity, entity.position.0, entity.position.1
        );
        if let Some(previous) = self.entities.insert(identity, entity) {
            if previous.alive {
                warn!("Entity {} was still alive when respawned", identity);
            }
        }
        &self.entities[&identity]
    }

    /// Overwrites the position of a live entity. Returns false (and changes
    /// nothing) for unknown or removed identities.
    pub fn apply_update(&mut self, identity: Identity, position: (f32, f32)) -> bool {
        match self.entities.get_mut(&identity) {
            Some(entity) if entity.alive => {
                entity.position = position;
                true
            }
            _ => {
                debug!("Ignoring update for unknown entity {}", identity);
                false
            }
        }
    }

    /// Marks an entity for removal at the end of the current tick.
    pub fn mark_removed(&mut self, identity: Identity) -> bool {
        match self.entities.get_mut(&identity) {
            Some(entity) if entity.alive => {
                entity.alive = false;
                true
            }
            _ => false,
        }
    }

    /// Erases every entity marked by [`EntityStore::mark_removed`].
    pub fn sweep_removed(&mut self) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, entity| entity.alive);
        let swept = before - self.entities.len();
        if swept > 0 {
            debug!("Swept {} removed entities", swept);
        }
        swept
    }

    pub fn remove(&mut self, identity: Identity) -> Option<Entity> {
        let removed = self.entities.remove(&identity);
        if removed.is_some() {
            info!("Removed entity {}", identity);
        }
        removed
    }

    pub fn get(&self, identity: Identity) -> Option<&Entity> {
        self.entities.get(&identity).filter(|entity| entity.alive)
    }

    /// Point-in-time view of every live entity.
    pub fn snapshot(&self) -> Vec<EntityState> {
        self.entities
            .values()
            .filter(|entity| entity.alive)
            .map(Entity::state)
            .collect()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.values().filter(|entity| entity.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
