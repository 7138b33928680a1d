use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LockResult, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

static POISON_WARNED: AtomicBool = AtomicBool::new(false);

/// Takes the guard out of a poisoned lock, warning once per process.
fn recover<G>(result: LockResult<G>, operation: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        if !POISON_WARNED.swap(true, Ordering::Relaxed) {
            warn!(operation, "metrics_lock_poisoned");
        }
        poisoned.into_inner()
    })
}

/// Loop health over the last metrics interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub fps: f32,
    pub tps: f32,
    pub frame_time_ms: f32,
    /// Server messages decoded per second.
    pub inbound_per_second: f32,
    pub entity_count: usize,
    /// Frames whose tick backlog was dropped by the per-frame tick cap.
    pub clamped_frames: u32,
}

/// Latest published snapshot, shareable with a host thread.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    latest: Arc<RwLock<LoopMetricsSnapshot>>,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        *recover(self.latest.read(), "read")
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        *recover(self.latest.write(), "write") = snapshot;
    }
}

#[derive(Debug, Default)]
struct IntervalCounters {
    frames: u32,
    ticks: u32,
    inbound: u64,
    clamped_frames: u32,
    frame_time: Duration,
}

#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    interval_start: Instant,
    interval: Duration,
    counters: IntervalCounters,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval_start: Instant::now(),
            interval,
            counters: IntervalCounters::default(),
        }
    }

    pub(crate) fn record_frame(&mut self, frame_dt: Duration) {
        let counters = &mut self.counters;
        counters.frames = counters.frames.saturating_add(1);
        counters.frame_time = counters.frame_time.saturating_add(frame_dt);
    }

    pub(crate) fn record_tick(&mut self, inbound_messages: u64) {
        let counters = &mut self.counters;
        counters.ticks = counters.ticks.saturating_add(1);
        counters.inbound = counters.inbound.saturating_add(inbound_messages);
    }

    pub(crate) fn record_clamp(&mut self) {
        self.counters.clamped_frames = self.counters.clamped_frames.saturating_add(1);
    }

    /// Closes the interval once it has run its length, starting a new one at
    /// `now`.
    pub(crate) fn maybe_snapshot(
        &mut self,
        now: Instant,
        entity_count: usize,
    ) -> Option<LoopMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }
        self.interval_start = now;
        let counters = std::mem::take(&mut self.counters);

        let seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        let per_second = |count: f32| count / seconds;
        let frame_time_ms = match counters.frames {
            0 => 0.0,
            frames => counters.frame_time.as_secs_f32() * 1000.0 / frames as f32,
        };
        Some(LoopMetricsSnapshot {
            fps: per_second(counters.frames as f32),
            tps: per_second(counters.ticks as f32),
            frame_time_ms,
            inbound_per_second: per_second(counters.inbound as f32),
            entity_count,
            clamped_frames: counters.clamped_frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn poisoned_handle() -> MetricsHandle {
        let handle = MetricsHandle::default();
        let lock = Arc::clone(&handle.latest);
        let _ = thread::spawn(move || {
            let _guard = lock.write().expect("write guard");
            panic!("poison metrics lock");
        })
        .join();
        handle
    }

    #[test]
    fn interval_rates_cover_frames_ticks_and_inbound() {
        let mut accumulator = MetricsAccumulator::new(Duration::from_secs(2));
        let base = accumulator.interval_start;

        for _ in 0..4 {
            accumulator.record_frame(Duration::from_millis(20));
        }
        for inbound in [3, 0, 5, 0, 0, 2, 0, 0] {
            accumulator.record_tick(inbound);
        }
        accumulator.record_clamp();

        let snapshot = accumulator
            .maybe_snapshot(base + Duration::from_secs(2), 41)
            .expect("interval elapsed");
        assert!((snapshot.fps - 2.0).abs() < 0.01);
        assert!((snapshot.tps - 4.0).abs() < 0.01);
        assert!((snapshot.frame_time_ms - 20.0).abs() < 0.001);
        assert!((snapshot.inbound_per_second - 5.0).abs() < 0.01);
        assert_eq!(snapshot.entity_count, 41);
        assert_eq!(snapshot.clamped_frames, 1);
    }

    #[test]
    fn each_interval_starts_from_zero() {
        let mut accumulator = MetricsAccumulator::new(Duration::from_secs(1));
        let base = accumulator.interval_start;
        accumulator.record_tick(7);
        accumulator.record_clamp();
        assert!(accumulator
            .maybe_snapshot(base + Duration::from_secs(1), 0)
            .is_some());

        let quiet = accumulator
            .maybe_snapshot(base + Duration::from_secs(2), 0)
            .expect("second interval");
        assert_eq!(quiet.tps, 0.0);
        assert_eq!(quiet.inbound_per_second, 0.0);
        assert_eq!(quiet.clamped_frames, 0);
        assert_eq!(quiet.frame_time_ms, 0.0);
    }

    #[test]
    fn short_interval_yields_nothing() {
        let mut accumulator = MetricsAccumulator::new(Duration::from_secs(1));
        let base = accumulator.interval_start;
        accumulator.record_frame(Duration::from_millis(16));

        assert!(accumulator
            .maybe_snapshot(base + Duration::from_millis(999), 0)
            .is_none());
    }

    #[test]
    fn poisoned_lock_still_reads_and_publishes() {
        let handle = poisoned_handle();
        assert_eq!(handle.snapshot(), LoopMetricsSnapshot::default());

        let published = LoopMetricsSnapshot {
            tps: 60.0,
            entity_count: 3,
            ..LoopMetricsSnapshot::default()
        };
        handle.publish(published);
        assert_eq!(handle.snapshot(), published);
    }
}
