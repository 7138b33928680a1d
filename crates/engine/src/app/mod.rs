mod input;
mod loop_runner;
mod metrics;
mod rendering;

pub use input::{InputAction, InputSnapshot};
pub use loop_runner::{
    run_headless, run_windowed, run_windowed_with_metrics, AppError, LoopConfig,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use rendering::{
    world_len_to_px, world_to_screen, RadarCamera, RadarFrame, RadarRenderer, Viewport,
    RADAR_PIXELS_PER_WORLD,
};
