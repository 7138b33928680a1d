use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pixels::Error as PixelsError;
use thiserror::Error;
use tracing::{info, warn};
use winit::dpi::LogicalSize;
use winit::error::{EventLoopError, OsError};
use winit::event::{DeviceEvent, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{CursorGrabMode, Window, WindowBuilder};

use crate::presentation::{HeadlessPresenter, Presenter};
use crate::protocol::ConnectionState;
use crate::session::{Session, SessionStats};

use super::input::InputCollector;
use super::metrics::MetricsAccumulator;
use super::rendering::{RadarFrame, RadarRenderer};
use super::{InputSnapshot, MetricsHandle};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    pub max_render_fps: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            window_title: "Flowsim".to_string(),
            window_width: 1280,
            window_height: 720,
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            max_render_fps: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to create event loop: {0}")]
    CreateEventLoop(#[source] EventLoopError),
    #[error("failed to create application window: {0}")]
    CreateWindow(#[source] OsError),
    #[error("failed to initialize renderer: {0}")]
    CreateRenderer(#[source] PixelsError),
    #[error("event loop failed: {0}")]
    EventLoopRun(#[source] EventLoopError),
}

/// Timing derived from a [`LoopConfig`], with zero values replaced by
/// defaults.
#[derive(Debug, Clone, Copy)]
struct LoopTiming {
    target_tps: u32,
    fixed_dt: Duration,
    max_frame_delta: Duration,
    max_ticks_per_frame: u32,
    metrics_log_interval: Duration,
    frame_budget: Option<Duration>,
}

impl LoopTiming {
    fn from_config(config: &LoopConfig) -> Self {
        let target_tps = config.target_tps.max(1);
        Self {
            target_tps,
            fixed_dt: Duration::from_secs_f64(1.0 / f64::from(target_tps)),
            max_frame_delta: non_zero_or(config.max_frame_delta, Duration::from_millis(250)),
            max_ticks_per_frame: config.max_ticks_per_frame.max(1),
            metrics_log_interval: non_zero_or(config.metrics_log_interval, Duration::from_secs(1)),
            frame_budget: frame_budget(config.max_render_fps),
        }
    }

    fn log(&self, headless: bool) {
        info!(
            headless,
            target_tps = self.target_tps,
            max_frame_delta_ms = self.max_frame_delta.as_millis() as u64,
            max_ticks_per_frame = self.max_ticks_per_frame,
            metrics_log_interval_ms = self.metrics_log_interval.as_millis() as u64,
            frame_budget_ms = self.frame_budget.map(|budget| budget.as_millis() as u64),
            "loop_config"
        );
    }
}

/// Fixed-step driver shared by both loops: turns raw frame time into session
/// ticks and tracks metrics.
struct Stepper {
    timing: LoopTiming,
    accumulated: Duration,
    last_frame: Instant,
    metrics: MetricsAccumulator,
    metrics_handle: MetricsHandle,
}

impl Stepper {
    fn new(timing: LoopTiming, metrics_handle: MetricsHandle) -> Self {
        Self {
            timing,
            accumulated: Duration::ZERO,
            last_frame: Instant::now(),
            metrics: MetricsAccumulator::new(timing.metrics_log_interval),
            metrics_handle,
        }
    }

    /// Runs however many ticks the elapsed time allows. Returns the raw frame
    /// delta.
    fn advance<P: Presenter>(
        &mut self,
        session: &mut Session<P>,
        mut next_input: impl FnMut() -> InputSnapshot,
    ) -> Duration {
        let now = Instant::now();
        let raw_frame_dt = now.saturating_duration_since(self.last_frame);
        self.last_frame = now;
        self.accumulated = self
            .accumulated
            .saturating_add(raw_frame_dt.min(self.timing.max_frame_delta));

        let plan = plan_sim_steps(
            self.accumulated,
            self.timing.fixed_dt,
            self.timing.max_ticks_per_frame,
        );
        for _ in 0..plan.ticks {
            let inbound_before = session.stats().inbound_messages;
            session.tick(&next_input(), self.timing.fixed_dt);
            let inbound = session.stats().inbound_messages.saturating_sub(inbound_before);
            self.metrics.record_tick(inbound);
        }
        self.accumulated = plan.carry;

        if !plan.dropped.is_zero() {
            self.metrics.record_clamp();
            warn!(
                dropped_ms = plan.dropped.as_millis() as u64,
                max_ticks_per_frame = self.timing.max_ticks_per_frame,
                "sim_clamp_triggered"
            );
        }
        raw_frame_dt
    }

    fn finish_frame<P: Presenter>(&mut self, session: &Session<P>, raw_frame_dt: Duration) {
        self.metrics.record_frame(raw_frame_dt);
        let entity_count = session.registry().live_count();
        let Some(snapshot) = self.metrics.maybe_snapshot(Instant::now(), entity_count) else {
            return;
        };
        self.metrics_handle.publish(snapshot);
        info!(
            fps = snapshot.fps,
            tps = snapshot.tps,
            frame_time_ms = snapshot.frame_time_ms,
            inbound_per_second = snapshot.inbound_per_second,
            clamped_frames = snapshot.clamped_frames,
            entity_count,
            connection = session.connection().state().as_str(),
            "loop_metrics"
        );
    }
}

pub fn run_windowed(
    config: LoopConfig,
    session: Session<HeadlessPresenter>,
) -> Result<(), AppError> {
    run_windowed_with_metrics(config, session, MetricsHandle::default())
}

/// Runs the session behind a window showing the radar view. Returns when the
/// window closes or Escape is pressed.
pub fn run_windowed_with_metrics(
    config: LoopConfig,
    mut session: Session<HeadlessPresenter>,
    metrics_handle: MetricsHandle,
) -> Result<(), AppError> {
    let event_loop = EventLoop::new().map_err(AppError::CreateEventLoop)?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(format!("{} [{}]", config.window_title, session.mode_kind()))
            .with_inner_size(LogicalSize::new(
                config.window_width as f64,
                config.window_height as f64,
            ))
            .build(&event_loop)
            .map_err(AppError::CreateWindow)?,
    );
    let mut renderer = RadarRenderer::new(Arc::clone(&window)).map_err(AppError::CreateRenderer)?;
    capture_pointer(&window);

    event_loop.set_control_flow(ControlFlow::Poll);

    let timing = LoopTiming::from_config(&config);
    timing.log(false);
    let mut stepper = Stepper::new(timing, metrics_handle);
    let mut input_collector = InputCollector::new();
    let mut last_present = Instant::now();

    event_loop
        .run(move |event, window_target| match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested => {
                    input_collector.mark_quit_requested();
                    info!(reason = "window_close", "shutdown_requested");
                    window_target.exit();
                }
                WindowEvent::Resized(new_size) => {
                    if let Err(error) = renderer.resize(new_size.width, new_size.height) {
                        warn!(error = %error, "renderer_resize_failed");
                        window_target.exit();
                    }
                }
                WindowEvent::ScaleFactorChanged { .. } => {
                    let size = window.inner_size();
                    if let Err(error) = renderer.resize(size.width, size.height) {
                        warn!(error = %error, "renderer_resize_failed");
                        window_target.exit();
                    }
                }
                WindowEvent::Focused(true) => capture_pointer(&window),
                WindowEvent::MouseInput { state, button, .. } => {
                    input_collector.handle_mouse_input(button, state);
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    input_collector.handle_keyboard_input(&event);
                    if input_collector.quit_requested {
                        info!(reason = "escape_key", "shutdown_requested");
                        window_target.exit();
                    }
                }
                WindowEvent::RedrawRequested => {
                    let raw_frame_dt =
                        stepper.advance(&mut session, || input_collector.snapshot_for_tick());

                    let wait = remaining_budget(last_present.elapsed(), timing.frame_budget);
                    if !wait.is_zero() {
                        thread::sleep(wait);
                    }

                    let frame = RadarFrame::capture(&session);
                    if let Err(error) = renderer.render(&frame) {
                        warn!(error = %error, "renderer_draw_failed");
                        window_target.exit();
                    }
                    last_present = Instant::now();
                    stepper.finish_frame(&session, raw_frame_dt);
                }
                _ => {}
            },
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta },
                ..
            } => {
                input_collector.handle_pointer_motion(delta.0, delta.1);
            }
            Event::AboutToWait => {
                window.request_redraw();
            }
            Event::LoopExiting => {
                log_shutdown(&session);
            }
            _ => {}
        })
        .map_err(AppError::EventLoopRun)
}

/// Runs the session without a window, feeding empty input at the tick
/// cadence. Stops after `run_for` when set, or once the connection closes.
pub fn run_headless<P: Presenter>(
    config: LoopConfig,
    session: &mut Session<P>,
    run_for: Option<Duration>,
    metrics_handle: MetricsHandle,
) -> SessionStats {
    let timing = LoopTiming::from_config(&config);
    timing.log(true);
    let started = Instant::now();
    let mut stepper = Stepper::new(timing, metrics_handle);

    loop {
        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            info!(reason = "run_for_elapsed", "shutdown_requested");
            break;
        }
        if session.connection().state() == ConnectionState::Closed {
            info!(reason = "connection_closed", "shutdown_requested");
            break;
        }

        let frame_start = Instant::now();
        let raw_frame_dt = stepper.advance(session, InputSnapshot::empty);
        stepper.finish_frame(session, raw_frame_dt);

        let wait = remaining_budget(frame_start.elapsed(), Some(timing.fixed_dt));
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    log_shutdown(session);
    session.stats()
}

fn capture_pointer(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    match grabbed {
        Ok(()) => window.set_cursor_visible(false),
        Err(error) => warn!(error = %error, "cursor_grab_failed"),
    }
}

fn log_shutdown<P: Presenter>(session: &Session<P>) {
    let stats = session.stats();
    let connection = session.connection().stats();
    info!(
        ticks = stats.ticks,
        inbound_messages = stats.inbound_messages,
        unknown_messages = stats.unknown_messages,
        laser_strikes = stats.laser_strikes,
        sent = connection.sent,
        dropped_outbound = connection.dropped_outbound,
        "shutdown"
    );
}

/// Outcome of planning one frame's fixed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPlan {
    ticks: u32,
    /// Partial tick carried into the next frame.
    carry: Duration,
    /// Whole ticks discarded because the per-frame cap was reached.
    dropped: Duration,
}

fn plan_sim_steps(accumulated: Duration, fixed_dt: Duration, max_ticks: u32) -> StepPlan {
    let whole_ticks = accumulated.as_nanos() / fixed_dt.as_nanos().max(1);
    let ticks = whole_ticks.min(u128::from(max_ticks)) as u32;
    let consumed = fixed_dt.saturating_mul(ticks);
    let leftover = accumulated.saturating_sub(consumed);
    if leftover >= fixed_dt {
        StepPlan {
            ticks,
            carry: Duration::ZERO,
            dropped: leftover,
        }
    } else {
        StepPlan {
            ticks,
            carry: leftover,
            dropped: Duration::ZERO,
        }
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

/// Minimum time between presents for a render fps cap. Zero or unset means
/// uncapped.
fn frame_budget(max_render_fps: Option<u32>) -> Option<Duration> {
    max_render_fps
        .filter(|fps| *fps > 0)
        .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)))
}

fn remaining_budget(elapsed: Duration, budget: Option<Duration>) -> Duration {
    budget.map_or(Duration::ZERO, |budget| budget.saturating_sub(elapsed))
}
