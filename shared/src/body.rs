//! Ball sizing, speed limits and the distance-radius contact test.
//!
//! Sizes live in normalized world units: a fresh player ball has
//! [`STARTING_POINTS`] points and a radius of `points * RADIUS_PER_POINT`.

pub const STARTING_POINTS: f32 = 20.0;
pub const RADIUS_PER_POINT: f32 = 0.004;

/// Top speed of any ball up to a radius of 0.5.
pub const MAX_SPEED: f32 = 0.5;
/// Floor for very large balls so they never stall.
pub const MIN_SPEED: f32 = 0.1;

pub fn radius(points: f32) -> f32 {
    points * RADIUS_PER_POINT
}

/// Speed cap for a ball of `radius`: constant up to 0.5, then shrinking as
/// the ball grows.
pub fn max_speed(radius: f32) -> f32 {
    (1.0 - radius.max(1.0 - MAX_SPEED)).max(MIN_SPEED)
}

/// Scales `velocity` down to the speed cap for `radius`. Direction is kept.
pub fn clamp_velocity(velocity: (f32, f32), radius: f32) -> (f32, f32) {
    let limit = max_speed(radius);
    let length = (velocity.0 * velocity.0 + velocity.1 * velocity.1).sqrt();
    if length > limit {
        (velocity.0 / length * limit, velocity.1 / length * limit)
    } else {
        velocity
    }
}

pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Two balls touch when their centres are no further apart than the larger
/// of the two radii.
pub fn check_collision(a: (f32, f32), a_radius: f32, b: (f32, f32), b_radius: f32) -> bool {
    distance(a, b) <= a_radius.max(b_radius)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub position: (f32, f32),
    pub points: f32,
}

impl Ball {
    pub fn new(position: (f32, f32), points: f32) -> Self {
        Self { position, points }
    }

    pub fn radius(&self) -> f32 {
        radius(self.points)
    }

    pub fn touches(&self, other: &Ball) -> bool {
        check_collision(self.position, self.radius(), other.position, other.radius())
    }

    /// Takes `other`'s points if touching it and strictly heavier. Equal
    /// balls leave each other alone.
    pub fn try_absorb(&mut self, other: &Ball) -> bool {
        if self.points > other.points && self.touches(other) {
            self.points += other.points;
            true
        } else {
            false
        }
    }
}
