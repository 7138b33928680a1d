use std::sync::Arc;

use glam::Vec3;
use pixels::{Error, Pixels, SurfaceTexture};
use winit::window::Window;

use crate::effects::EffectKind;
use crate::presentation::{HeadlessPresenter, VisualRole};
use crate::session::Session;

use super::transform::{world_len_to_px, world_to_screen, RadarCamera, Viewport};
use super::RADAR_PIXELS_PER_WORLD;

const CLEAR_COLOR: [u8; 4] = [14, 16, 22, 255];
const GRID_COLOR: [u8; 4] = [30, 34, 44, 255];
const GRID_CELL_WORLD: f32 = 10.0;
const PLAYER_COLOR: [u8; 4] = [240, 240, 250, 255];
const HEADING_COLOR: [u8; 4] = [150, 150, 170, 255];
const TARGET_HIGHLIGHT_COLOR: [u8; 4] = [80, 220, 255, 255];
const LASER_COLOR: [u8; 4] = [255, 80, 80, 255];
const PLAYER_HALF_SIZE_PX: i32 = 5;
const HEADING_LENGTH_PX: i32 = 18;
const TARGET_PADDING_PX: i32 = 3;
const MAX_BLIP_HALF_SIZE_PX: i32 = 120;

fn role_color(role: VisualRole) -> [u8; 4] {
    match role {
        VisualRole::Rock => [150, 120, 95, 255],
        VisualRole::Ring => [90, 200, 120, 255],
        VisualRole::Platform => [70, 78, 96, 255],
        VisualRole::Door => [170, 150, 70, 255],
        VisualRole::Target => [230, 110, 200, 255],
        VisualRole::Switch => [255, 210, 70, 255],
    }
}

fn effect_color(kind: EffectKind) -> [u8; 4] {
    match kind {
        EffectKind::Laser => LASER_COLOR,
        EffectKind::Explosion => [255, 150, 40, 255],
        EffectKind::Spark => [255, 255, 160, 255],
        EffectKind::Shatter => [200, 160, 255, 255],
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarBlip {
    pub role: VisualRole,
    pub position: Vec3,
    /// Footprint on the XZ plane, in world units.
    pub half_extent_x: f32,
    pub half_extent_z: f32,
}

/// Everything one radar frame shows, detached from the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadarFrame {
    pub player: Vec3,
    pub heading: Vec3,
    pub blips: Vec<RadarBlip>,
    pub target: Option<Vec3>,
    pub lasers: Vec<Vec3>,
    pub bursts: Vec<(EffectKind, Vec3, f32)>,
}

impl RadarFrame {
    pub fn capture(session: &Session<HeadlessPresenter>) -> Self {
        let viewpoint = session.viewpoint();
        let mut blips = session
            .presenter()
            .visuals()
            .map(|(_, record)| RadarBlip {
                role: record.role,
                position: record.spatial.position,
                half_extent_x: record.spatial.scale.x.abs() * 0.5,
                half_extent_z: record.spatial.scale.z.abs() * 0.5,
            })
            .collect::<Vec<_>>();
        // Large parts first so small blips stay visible on top.
        blips.sort_by(|a, b| {
            let area_a = a.half_extent_x * a.half_extent_z;
            let area_b = b.half_extent_x * b.half_extent_z;
            area_b.total_cmp(&area_a)
        });

        let target = session
            .targeting()
            .current()
            .and_then(|id| session.registry().get(id))
            .map(|entity| entity.spatial.position);
        let effects = session.effects();
        let lasers = effects
            .lasers
            .items()
            .iter()
            .map(|laser| laser.data.position)
            .collect();
        let bursts = [
            (EffectKind::Explosion, &effects.explosions),
            (EffectKind::Spark, &effects.sparks),
            (EffectKind::Shatter, &effects.shatters),
        ]
        .into_iter()
        .flat_map(|(kind, set)| {
            set.items()
                .iter()
                .map(move |burst| (kind, burst.data.position, burst.data.scale))
        })
        .collect();

        Self {
            player: session.player().position(),
            heading: viewpoint.forward,
            blips,
            target,
            lasers,
            bursts,
        }
    }
}

/// Top-down debug view of the session, drawn into a `pixels` surface.
pub struct RadarRenderer {
    window: Arc<Window>,
    pixels: Pixels<'static>,
    viewport: Viewport,
}

impl RadarRenderer {
    pub fn new(window: Arc<Window>) -> Result<Self, Error> {
        let size = window.inner_size();
        let pixels = Self::build_pixels(Arc::clone(&window), size.width, size.height)?;
        Ok(Self {
            window,
            pixels,
            viewport: Viewport {
                width: size.width,
                height: size.height,
            },
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), Error> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.pixels = Self::build_pixels(Arc::clone(&self.window), width, height)?;
        self.viewport = Viewport { width, height };
        Ok(())
    }

    fn build_pixels(
        window: Arc<Window>,
        width: u32,
        height: u32,
    ) -> Result<Pixels<'static>, Error> {
        let surface = SurfaceTexture::new(width, height, window);
        Pixels::new(width, height, surface)
    }

    pub fn render(&mut self, frame: &RadarFrame) -> Result<(), Error> {
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Ok(());
        }
        draw_radar(self.pixels.frame_mut(), self.viewport, frame);
        self.pixels.render()
    }
}

pub(crate) fn draw_radar(buffer: &mut [u8], viewport: Viewport, frame: &RadarFrame) {
    for chunk in buffer.chunks_exact_mut(4) {
        chunk.copy_from_slice(&CLEAR_COLOR);
    }
    let camera = RadarCamera::following(frame.player, RADAR_PIXELS_PER_WORLD);
    let canvas = Canvas {
        width: viewport.width,
        height: viewport.height,
    };

    draw_grid(buffer, canvas, &camera, viewport);

    for blip in &frame.blips {
        let (cx, cy) = world_to_screen(blip.position, &camera, viewport);
        let half_w = world_len_to_px(blip.half_extent_x, &camera).min(MAX_BLIP_HALF_SIZE_PX);
        let half_h = world_len_to_px(blip.half_extent_z, &camera).min(MAX_BLIP_HALF_SIZE_PX);
        canvas.fill_rect(buffer, cx, cy, half_w, half_h, role_color(blip.role));
    }

    if let Some(target) = frame.target {
        let (cx, cy) = world_to_screen(target, &camera, viewport);
        let half = PLAYER_HALF_SIZE_PX + TARGET_PADDING_PX;
        canvas.outline_rect(buffer, cx, cy, half, half, TARGET_HIGHLIGHT_COLOR);
    }

    for (kind, position, scale) in &frame.bursts {
        let (cx, cy) = world_to_screen(*position, &camera, viewport);
        let half = world_len_to_px(scale * 0.5, &camera).clamp(2, MAX_BLIP_HALF_SIZE_PX);
        canvas.outline_rect(buffer, cx, cy, half, half, effect_color(*kind));
    }

    for laser in &frame.lasers {
        let (cx, cy) = world_to_screen(*laser, &camera, viewport);
        canvas.fill_rect(buffer, cx, cy, 1, 1, LASER_COLOR);
    }

    let (px, py) = world_to_screen(frame.player, &camera, viewport);
    let flat = glam::Vec2::new(frame.heading.x, frame.heading.z).normalize_or_zero();
    if flat != glam::Vec2::ZERO {
        let tip_x = px + (flat.x * HEADING_LENGTH_PX as f32).round() as i32;
        let tip_y = py + (flat.y * HEADING_LENGTH_PX as f32).round() as i32;
        canvas.line(buffer, (px, py), (tip_x, tip_y), HEADING_COLOR);
    }
    canvas.cross(buffer, px, py, PLAYER_HALF_SIZE_PX, PLAYER_COLOR);
}

fn draw_grid(buffer: &mut [u8], canvas: Canvas, camera: &RadarCamera, viewport: Viewport) {
    let half_w_world = viewport.width as f32 / (2.0 * camera.pixels_per_world);
    let half_h_world = viewport.height as f32 / (2.0 * camera.pixels_per_world);
    let ix_start = ((camera.center.x - half_w_world) / GRID_CELL_WORLD).floor() as i32;
    let ix_end = ((camera.center.x + half_w_world) / GRID_CELL_WORLD).ceil() as i32;
    let iz_start = ((camera.center.y - half_h_world) / GRID_CELL_WORLD).floor() as i32;
    let iz_end = ((camera.center.y + half_h_world) / GRID_CELL_WORLD).ceil() as i32;

    for ix in ix_start..=ix_end {
        let world = Vec3::new(ix as f32 * GRID_CELL_WORLD, 0.0, camera.center.y);
        let (x, _) = world_to_screen(world, camera, viewport);
        canvas.line(buffer, (x, 0), (x, canvas.height as i32 - 1), GRID_COLOR);
    }
    for iz in iz_start..=iz_end {
        let world = Vec3::new(camera.center.x, 0.0, iz as f32 * GRID_CELL_WORLD);
        let (_, y) = world_to_screen(world, camera, viewport);
        canvas.line(buffer, (0, y), (canvas.width as i32 - 1, y), GRID_COLOR);
    }
}

#[derive(Debug, Clone, Copy)]
struct Canvas {
    width: u32,
    height: u32,
}

impl Canvas {
    fn put(&self, buffer: &mut [u8], x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        if let Some(pixel) = buffer.get_mut(offset..offset + 4) {
            pixel.copy_from_slice(&color);
        }
    }

    fn fill_rect(
        &self,
        buffer: &mut [u8],
        cx: i32,
        cy: i32,
        half_w: i32,
        half_h: i32,
        color: [u8; 4],
    ) {
        let left = (cx - half_w).max(0);
        let right = (cx + half_w).min(self.width as i32 - 1);
        let top = (cy - half_h).max(0);
        let bottom = (cy + half_h).min(self.height as i32 - 1);
        for y in top..=bottom {
            for x in left..=right {
                self.put(buffer, x, y, color);
            }
        }
    }

    fn outline_rect(
        &self,
        buffer: &mut [u8],
        cx: i32,
        cy: i32,
        half_w: i32,
        half_h: i32,
        color: [u8; 4],
    ) {
        let (left, right, top, bottom) = (cx - half_w, cx + half_w, cy - half_h, cy + half_h);
        self.line(buffer, (left, top), (right, top), color);
        self.line(buffer, (left, bottom), (right, bottom), color);
        self.line(buffer, (left, top), (left, bottom), color);
        self.line(buffer, (right, top), (right, bottom), color);
    }

    fn cross(&self, buffer: &mut [u8], cx: i32, cy: i32, half: i32, color: [u8; 4]) {
        self.line(buffer, (cx - half, cy), (cx + half, cy), color);
        self.line(buffer, (cx, cy - half), (cx, cy + half), color);
    }

    fn line(&self, buffer: &mut [u8], from: (i32, i32), to: (i32, i32), color: [u8; 4]) {
        let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs());
        if steps == 0 {
            self.put(buffer, from.0, from.1, color);
            return;
        }
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            let x = from.0 as f32 + (to.0 - from.0) as f32 * t;
            let y = from.1 as f32 + (to.1 - from.1) as f32 * t;
            self.put(buffer, x.round() as i32, y.round() as i32, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIEWPORT: Viewport = Viewport {
        width: 64,
        height: 48,
    };

    fn pixel(buffer: &[u8], x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * VIEWPORT.width + x) * 4) as usize;
        [
            buffer[offset],
            buffer[offset + 1],
            buffer[offset + 2],
            buffer[offset + 3],
        ]
    }

    fn buffer() -> Vec<u8> {
        vec![0; (VIEWPORT.width * VIEWPORT.height * 4) as usize]
    }

    #[test]
    fn player_is_drawn_at_center() {
        let mut buffer = buffer();
        let frame = RadarFrame {
            player: Vec3::new(3.0, 1.0, 3.0),
            ..RadarFrame::default()
        };
        draw_radar(&mut buffer, VIEWPORT, &frame);
        assert_eq!(pixel(&buffer, 32, 24), PLAYER_COLOR);
    }

    #[test]
    fn blips_use_role_colors_and_clip_at_edges() {
        let mut buffer = buffer();
        let frame = RadarFrame {
            player: Vec3::ZERO,
            blips: vec![
                RadarBlip {
                    role: VisualRole::Platform,
                    position: Vec3::new(8.0, 0.0, 6.0),
                    half_extent_x: 10.0,
                    half_extent_z: 10.0,
                },
                RadarBlip {
                    role: VisualRole::Rock,
                    position: Vec3::new(2.0, 0.0, 0.0),
                    half_extent_x: 0.5,
                    half_extent_z: 0.5,
                },
            ],
            ..RadarFrame::default()
        };
        draw_radar(&mut buffer, VIEWPORT, &frame);
        // 2 world units at 6 px per unit right of center.
        assert_eq!(pixel(&buffer, 44, 24), role_color(VisualRole::Rock));
        assert_eq!(pixel(&buffer, 63, 47), role_color(VisualRole::Platform));
    }

    #[test]
    fn target_gets_highlight_outline() {
        let mut buffer = buffer();
        let frame = RadarFrame {
            player: Vec3::ZERO,
            target: Some(Vec3::new(-3.0, 0.0, 0.0)),
            ..RadarFrame::default()
        };
        draw_radar(&mut buffer, VIEWPORT, &frame);
        let half = (PLAYER_HALF_SIZE_PX + TARGET_PADDING_PX) as u32;
        assert_eq!(pixel(&buffer, 14 - half, 24), TARGET_HIGHLIGHT_COLOR);
    }
}
