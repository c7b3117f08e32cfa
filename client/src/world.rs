//! Entity view shared between the network thread and the render thread
//!
//! Ownership contract, enforced by which methods each side calls:
//! - render/input side writes the local entity's velocity and integrates its
//!   position, and reads every position for drawing;
//! - network side reads the local entity's position to send it and replaces
//!   the remote entities from decoded snapshots.
//!
//! Every access goes through one mutex, so neither side ever sees a
//! half-applied snapshot.
//!
//! Mass is local: the local ball grows by absorbing lighter pellets it
//! touches. Snapshots carry positions only, so remote entities are assumed
//! to be starting-size when testing contact and are never absorbed.

use shared::body::{self, Ball, STARTING_POINTS};
use shared::{EntityState, Identity, SPAWN_POSITION};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct LocalEntity {
    pub identity: Option<Identity>,
    pub position: (f32, f32),
    /// Requested velocity; capped by the ball's size when integrating.
    pub velocity: (f32, f32),
    pub points: f32,
}

impl LocalEntity {
    pub fn ball(&self) -> Ball {
        Ball::new(self.position, self.points)
    }

    pub fn radius(&self) -> f32 {
        body::radius(self.points)
    }
}

#[derive(Debug, Clone)]
pub struct World {
    local: LocalEntity,
    remote: BTreeMap<Identity, (f32, f32)>,
    pellets: Vec<Ball>,
    connected: bool,
    snapshots_applied: u64,
}

impl Default for World {
    fn default() -> Self {
        Self {
            local: LocalEntity {
                identity: None,
                position: SPAWN_POSITION,
                velocity: (0.0, 0.0),
                points: STARTING_POINTS,
            },
            remote: BTreeMap::new(),
            pellets: Vec::new(),
            connected: false,
            snapshots_applied: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedWorld {
    inner: Arc<Mutex<World>>,
}

impl SharedWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        // A panic on the other thread must not take the view down with it
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Render/input side

    pub fn set_local_velocity(&self, velocity: (f32, f32)) {
        self.lock().local.velocity = velocity;
    }

    /// Advances the local entity by its velocity, capped for its size.
    pub fn integrate(&self, dt: f32) {
        let mut world = self.lock();
        let (vx, vy) = body::clamp_velocity(world.local.velocity, world.local.radius());
        world.local.position.0 += vx * dt;
        world.local.position.1 += vy * dt;
    }

    pub fn local(&self) -> LocalEntity {
        self.lock().local.clone()
    }

    /// Everything there is to draw: the local entity (once it has an
    /// identity) followed by the remote ones in identity order.
    pub fn entities(&self) -> Vec<EntityState> {
        let world = self.lock();
        let local = world
            .local
            .identity
            .map(|id| EntityState::new(id, world.local.position.0, world.local.position.1));
        local
            .into_iter()
            .chain(
                world
                    .remote
                    .iter()
                    .map(|(id, (x, y))| EntityState::new(*id, *x, *y)),
            )
            .collect()
    }

    pub fn snapshots_applied(&self) -> u64 {
        self.lock().snapshots_applied
    }

    pub fn scatter_pellet(&self, position: (f32, f32), points: f32) {
        self.lock().pellets.push(Ball::new(position, points));
    }

    pub fn pellets(&self) -> Vec<Ball> {
        self.lock().pellets.clone()
    }

    /// Absorbs every pellet the local ball touches and outweighs. Returns
    /// the points gained.
    pub fn absorb_overlapping(&self) -> f32 {
        let mut guard = self.lock();
        let world = &mut *guard;
        let before = world.local.points;
        let local = &mut world.local;

        world.pellets.retain(|pellet| {
            let mut ball = local.ball();
            if ball.try_absorb(pellet) {
                local.points = ball.points;
                false
            } else {
                true
            }
        });
        world.local.points - before
    }

    /// Remote entities currently in contact with the local ball.
    pub fn touching(&self) -> Vec<Identity> {
        let world = self.lock();
        let local = world.local.ball();
        let remote_radius = body::radius(STARTING_POINTS);
        world
            .remote
            .iter()
            .filter(|(_, position)| {
                body::check_collision(local.position, local.radius(), **position, remote_radius)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    // Network side

    /// Position of the locally owned entity, if the server has named it yet.
    pub fn local_position(&self) -> Option<EntityState> {
        let world = self.lock();
        world
            .local
            .identity
            .map(|id| EntityState::new(id, world.local.position.0, world.local.position.1))
    }

    pub fn assign_identity(&self, identity: Identity) {
        let mut world = self.lock();
        world.local.identity = Some(identity);
        world.remote.remove(&identity);
        world.connected = true;
    }

    /// Replaces every remote entity with the snapshot's contents. The entry
    /// for our own identity is skipped; the local position is ours to own.
    pub fn apply_snapshot(&self, entities: &[EntityState]) {
        let mut world = self.lock();
        let own = world.local.identity;
        world.remote = entities
            .iter()
            .filter(|entity| Some(entity.identity) != own)
            .map(|entity| (entity.identity, entity.position()))
            .collect();
        world.snapshots_applied += 1;
    }

    pub fn mark_disconnected(&self) {
        let mut world = self.lock();
        world.connected = false;
        world.remote.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
