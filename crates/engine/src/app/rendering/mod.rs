mod radar;
mod transform;

pub use radar::{RadarFrame, RadarRenderer};
pub use transform::{world_to_screen, world_len_to_px, RadarCamera, Viewport};

pub const RADAR_PIXELS_PER_WORLD: f32 = 6.0;
