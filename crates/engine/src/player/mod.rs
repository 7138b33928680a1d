mod camera;

pub use camera::{
    look_rotation, FirstPersonLook, OrbitRig, Viewpoint, LOOK_SENSITIVITY, ORBIT_ORIGIN,
    PITCH_LIMIT_RADIANS,
};

use glam::Vec3;
use tracing::info;

use crate::collision::{Capsule, CapsuleHit, CollisionWorld};

pub const FALL_LIMIT_Y: f32 = -30.0;

/// Per-mode movement constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    pub thrust_per_second: f32,
    pub damping_rate: f32,
    pub airborne_damping_factor: f32,
    pub gravity: f32,
    pub jump_speed: f32,
    pub brake_factor: f32,
    pub capsule_radius: f32,
    pub capsule_height: f32,
    pub fall_limit_y: Option<f32>,
}

impl MotionProfile {
    pub const fn walker() -> Self {
        Self {
            thrust_per_second: 8.0,
            damping_rate: 4.0,
            airborne_damping_factor: 0.05,
            gravity: 30.0,
            jump_speed: 15.0,
            brake_factor: 1.0,
            capsule_radius: 1.0,
            capsule_height: 1.0,
            fall_limit_y: Some(FALL_LIMIT_Y),
        }
    }

    pub const fn ship() -> Self {
        Self {
            thrust_per_second: 8.0,
            damping_rate: 4.0,
            airborne_damping_factor: 0.05,
            gravity: 0.0,
            jump_speed: 0.0,
            brake_factor: 0.98,
            capsule_radius: 1.0,
            capsule_height: 1.0,
            fall_limit_y: None,
        }
    }
}

/// Capsule body with velocity. The reported position is the capsule's upper
/// point.
#[derive(Debug, Clone)]
pub struct PlayerController {
    profile: MotionProfile,
    capsule: Capsule,
    velocity: Vec3,
    on_floor: bool,
    safe_anchor: Vec3,
}

impl PlayerController {
    pub fn new(profile: MotionProfile, start: Vec3) -> Self {
        Self {
            capsule: Capsule::upright(start, profile.capsule_height, profile.capsule_radius),
            profile,
            velocity: Vec3::ZERO,
            on_floor: false,
            safe_anchor: start,
        }
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    pub fn position(&self) -> Vec3 {
        self.capsule.end
    }

    pub fn capsule(&self) -> &Capsule {
        &self.capsule
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    pub fn on_floor(&self) -> bool {
        self.on_floor
    }

    pub fn safe_anchor(&self) -> Vec3 {
        self.safe_anchor
    }

    pub fn set_safe_anchor(&mut self, anchor: Vec3) {
        self.safe_anchor = anchor;
    }

    /// Adds `thrust_per_second * dt` along `direction`.
    pub fn thrust(&mut self, direction: Vec3, dt_seconds: f32) {
        self.velocity +=
            direction.normalize_or_zero() * self.profile.thrust_per_second * dt_seconds;
    }

    pub fn jump(&mut self) -> bool {
        if !self.on_floor {
            return false;
        }
        self.velocity.y = self.profile.jump_speed;
        true
    }

    pub fn brake(&mut self) {
        self.velocity *= self.profile.brake_factor;
    }

    /// Damping, gravity while airborne, then moves the capsule by
    /// `velocity * dt`.
    pub fn integrate(&mut self, dt_seconds: f32) {
        let mut damping = (-self.profile.damping_rate * dt_seconds).exp() - 1.0;
        if !self.on_floor {
            self.velocity.y -= self.profile.gravity * dt_seconds;
            damping *= self.profile.airborne_damping_factor;
        }
        self.velocity += self.velocity * damping;
        self.capsule.translate(self.velocity * dt_seconds);
    }

    /// One depenetration pass against the static geometry.
    pub fn resolve_collisions(&mut self, world: &CollisionWorld) -> Option<CapsuleHit> {
        self.on_floor = false;
        let hit = world.intersect_capsule(&self.capsule)?;
        self.on_floor = hit.normal.y > 0.0;
        if !self.on_floor {
            self.velocity -= hit.normal * hit.normal.dot(self.velocity);
        }
        self.capsule.translate(hit.normal * hit.depth);
        Some(hit)
    }

    pub fn step(&mut self, dt_seconds: f32, world: &CollisionWorld) -> Option<CapsuleHit> {
        self.integrate(dt_seconds);
        self.resolve_collisions(world)
    }

    /// Puts the capsule base at `base` and stops all motion.
    pub fn teleport(&mut self, base: Vec3) {
        self.capsule = Capsule::upright(
            base,
            self.profile.capsule_height,
            self.profile.capsule_radius,
        );
        self.velocity = Vec3::ZERO;
        self.on_floor = false;
    }

    /// Returns the player to the safe anchor after falling below the
    /// profile's limit.
    pub fn recover_if_fallen(&mut self) -> bool {
        let Some(limit) = self.profile.fall_limit_y else {
            return false;
        };
        if self.capsule.start.y >= limit {
            return false;
        }
        let fell_at = self.position();
        self.teleport(self.safe_anchor);
        info!(
            fell_x = fell_at.x,
            fell_y = fell_at.y,
            fell_z = fell_at.z,
            anchor_y = self.safe_anchor.y,
            "player_recovered"
        );
        true
    }
}
