use glam::{Vec2, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Top-down view over the world's XZ plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarCamera {
    /// World (x, z) shown at the viewport center.
    pub center: Vec2,
    pub pixels_per_world: f32,
}

impl RadarCamera {
    pub fn following(position: Vec3, pixels_per_world: f32) -> Self {
        Self {
            center: Vec2::new(position.x, position.z),
            pixels_per_world,
        }
    }
}

/// Projects a world position onto the radar. Height is dropped; +Z points
/// down the screen.
pub fn world_to_screen(world: Vec3, camera: &RadarCamera, viewport: Viewport) -> (i32, i32) {
    let x = (world.x - camera.center.x) * camera.pixels_per_world + viewport.width as f32 * 0.5;
    let y = (world.z - camera.center.y) * camera.pixels_per_world + viewport.height as f32 * 0.5;
    (x.round() as i32, y.round() as i32)
}

/// Radar pixels covering `world_units`, at least one.
pub fn world_len_to_px(world_units: f32, camera: &RadarCamera) -> i32 {
    ((world_units * camera.pixels_per_world).round() as i32).max(1)
}
