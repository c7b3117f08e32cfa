//! Headless stand-in for the render/input thread: steers the local entity
//! toward random waypoints, keeps pellets scattered around it to eat, and
//! reports what it can see.

use crate::world::SharedWorld;
use log::info;
use rand::Rng;
use shared::body::MAX_SPEED;
use std::time::Duration;

pub const WANDER_RADIUS: f32 = 2.0;
pub const PELLET_COUNT: usize = 20;

/// Close enough to a waypoint to pick the next one.
const ARRIVAL_DISTANCE: f32 = 0.05;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Autopilot<R: Rng> {
    rng: R,
    waypoint: (f32, f32),
    since_report: Duration,
}

impl<R: Rng> Autopilot<R> {
    pub fn new(mut rng: R) -> Self {
        let waypoint = random_point(&mut rng);
        Self {
            rng,
            waypoint,
            since_report: Duration::ZERO,
        }
    }

    pub fn waypoint(&self) -> (f32, f32) {
        self.waypoint
    }

    /// One frame: aim at the current waypoint, move, eat, and log the
    /// visible entity count once per [`REPORT_INTERVAL`].
    pub fn frame(&mut self, world: &SharedWorld, dt: Duration) {
        let (x, y) = world.local().position;
        let (dx, dy) = (self.waypoint.0 - x, self.waypoint.1 - y);
        let distance = (dx * dx + dy * dy).sqrt();

        if distance < ARRIVAL_DISTANCE {
            self.waypoint = random_point(&mut self.rng);
            world.set_local_velocity((0.0, 0.0));
        } else {
            world.set_local_velocity((dx / distance * MAX_SPEED, dy / distance * MAX_SPEED));
        }
        world.integrate(dt.as_secs_f32());
        world.absorb_overlapping();

        for _ in world.pellets().len()..PELLET_COUNT {
            let points = self.rng.gen_range(1.0..=5.0);
            world.scatter_pellet(random_point(&mut self.rng), points);
        }

        self.since_report += dt;
        if self.since_report >= REPORT_INTERVAL {
            self.since_report = Duration::ZERO;
            info!(
                "{} entities visible ({} touching), {} points, {} snapshots applied",
                world.entities().len(),
                world.touching().len(),
                world.local().points,
                world.snapshots_applied()
            );
        }
    }
}

fn random_point<R: Rng>(rng: &mut R) -> (f32, f32) {
    (
        rng.gen_range(-WANDER_RADIUS..=WANDER_RADIUS),
        rng.gen_range(-WANDER_RADIUS..=WANDER_RADIUS),
    )
}
