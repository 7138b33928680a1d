use std::f32::consts::PI;

use glam::{Quat, Vec3};

use crate::collision::Ray;

pub const LOOK_SENSITIVITY: f32 = 1.0 / 500.0;
pub const PITCH_LIMIT_RADIANS: f32 = 1.48;
pub const ORBIT_SENSITIVITY: f32 = 0.02;
pub const ORBIT_MIN_POLAR: f32 = 0.5;
pub const ORBIT_MAX_POLAR: f32 = 0.9 * PI;
pub const ORBIT_ORIGIN: Vec3 = Vec3::new(0.0, 3.0, 0.0);
pub const ORBIT_RADIUS: f32 = 6.0;

/// Eye point and look direction used for targeting rays and shooting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub eye: Vec3,
    pub forward: Vec3,
    pub orientation: Quat,
}

impl Viewpoint {
    pub fn looking(eye: Vec3, forward: Vec3) -> Self {
        let forward = forward.normalize_or_zero();
        Self {
            eye,
            forward,
            orientation: look_rotation(forward),
        }
    }

    pub fn ray(&self) -> Ray {
        Ray::new(self.eye, self.forward)
    }
}

/// Rotation taking local +Z onto `forward` without roll.
pub fn look_rotation(forward: Vec3) -> Quat {
    let forward = forward.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let yaw = forward.x.atan2(forward.z);
    let pitch = forward.y.clamp(-1.0, 1.0).asin();
    Quat::from_rotation_y(yaw) * Quat::from_rotation_x(-pitch)
}

/// Yaw/pitch look driven by pointer deltas. Yaw 0 faces +Z.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FirstPersonLook {
    pub yaw: f32,
    pub pitch: f32,
}

impl FirstPersonLook {
    pub fn apply_pointer(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * LOOK_SENSITIVITY;
        self.pitch = (self.pitch - dy * LOOK_SENSITIVITY)
            .clamp(-PITCH_LIMIT_RADIANS, PITCH_LIMIT_RADIANS);
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(-self.pitch)
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::Z
    }

    /// Forward projected onto the ground plane.
    pub fn flat_forward(&self) -> Vec3 {
        Vec3::new(self.yaw.sin(), 0.0, self.yaw.cos())
    }

    pub fn right(&self) -> Vec3 {
        self.flat_forward().cross(Vec3::Y)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Third-person camera on a sphere around a point above the ship.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitRig {
    pub origin: Vec3,
    pub radius: f32,
    /// Polar angle from +Y.
    pub phi: f32,
    /// Azimuth; `PI` puts the camera behind a ship facing +Z.
    pub theta: f32,
}

impl Default for OrbitRig {
    fn default() -> Self {
        Self {
            origin: ORBIT_ORIGIN,
            radius: ORBIT_RADIUS,
            phi: PI * 0.5,
            theta: PI,
        }
    }
}

impl OrbitRig {
    pub fn apply_pointer(&mut self, dx: f32, dy: f32) {
        self.theta -= dx * ORBIT_SENSITIVITY;
        self.phi = (self.phi - dy * ORBIT_SENSITIVITY).clamp(ORBIT_MIN_POLAR, ORBIT_MAX_POLAR);
    }

    pub fn offset(&self) -> Vec3 {
        let sin_phi = self.phi.sin();
        Vec3::new(
            self.radius * sin_phi * self.theta.sin(),
            self.radius * self.phi.cos(),
            self.radius * sin_phi * self.theta.cos(),
        )
    }

    pub fn focus(&self, ship_position: Vec3) -> Vec3 {
        ship_position + self.origin
    }

    pub fn viewpoint(&self, ship_position: Vec3) -> Viewpoint {
        let eye = self.focus(ship_position) + self.offset();
        Viewpoint::looking(eye, -self.offset())
    }
}
