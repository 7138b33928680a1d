use std::time::Duration;

use glam::{Quat, Vec3};

use crate::clock::SimTime;
use crate::collision::Ray;

pub const LASER_WINDOW: Duration = Duration::from_millis(1000);
pub const EXPLOSION_WINDOW: Duration = Duration::from_millis(1000);
pub const SPARK_WINDOW: Duration = Duration::from_millis(500);
pub const SHATTER_WINDOW: Duration = Duration::from_millis(500);
pub const LASER_SPEED_UNITS_PER_SECOND: f32 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectKind {
    Laser,
    Explosion,
    Spark,
    Shatter,
}

impl EffectKind {
    pub const fn window(self) -> Duration {
        match self {
            EffectKind::Laser => LASER_WINDOW,
            EffectKind::Explosion => EXPLOSION_WINDOW,
            EffectKind::Spark => SPARK_WINDOW,
            EffectKind::Shatter => SHATTER_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub id: EffectId,
    pub created_at: SimTime,
    pub data: T,
}

/// Cosmetic burst (explosion, spark, shattered target) at a fixed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Burst {
    pub position: Vec3,
    pub scale: f32,
    pub orientation: Option<Quat>,
}

impl Burst {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            scale: 1.0,
            orientation: None,
        }
    }

    pub fn oriented(position: Vec3, orientation: Option<Quat>) -> Self {
        Self {
            position,
            scale: 1.0,
            orientation,
        }
    }
}

/// A projectile. Its hit-test ray is fixed at launch; only `position` moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserBolt {
    pub origin: Vec3,
    pub heading: Vec3,
    pub position: Vec3,
    pub orientation: Quat,
}

impl LaserBolt {
    pub fn launch(origin: Vec3, heading: Vec3, orientation: Quat) -> Self {
        Self {
            origin,
            heading: heading.normalize_or_zero(),
            position: origin,
            orientation,
        }
    }

    pub fn advance(&mut self, dt_seconds: f32) {
        self.position += self.heading * LASER_SPEED_UNITS_PER_SECOND * dt_seconds;
    }

    pub fn ray(&self) -> Ray {
        Ray::new(self.origin, self.heading)
    }
}

/// Append-with-expiry set with a single debounced sweep deadline.
///
/// Every trigger drops items that have reached the window, appends, and
/// replaces the pending sweep with `now + window`. After the sweep fires the
/// set holds exactly the items younger than the window at that instant.
#[derive(Debug, Clone)]
pub struct EffectSet<T> {
    window: Duration,
    items: Vec<Timed<T>>,
    pending_sweep: Option<SimTime>,
    next_id: u64,
}

impl<T> EffectSet<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            items: Vec::new(),
            pending_sweep: None,
            next_id: 0,
        }
    }

    pub fn for_kind(kind: EffectKind) -> Self {
        Self::new(kind.window())
    }

    pub fn trigger(&mut self, now: SimTime, data: T) -> EffectId {
        self.retain_fresh(now);
        let id = EffectId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.items.push(Timed {
            id,
            created_at: now,
            data,
        });
        self.pending_sweep = Some(now.advanced_by(self.window));
        id
    }

    /// Fires the pending sweep once its deadline has passed. Returns how many
    /// items it evicted.
    pub fn poll(&mut self, now: SimTime) -> usize {
        match self.pending_sweep {
            Some(deadline) if now >= deadline => {
                self.pending_sweep = None;
                let before = self.items.len();
                self.retain_fresh(now);
                before - self.items.len()
            }
            _ => 0,
        }
    }

    pub fn remove(&mut self, id: EffectId) -> Option<Timed<T>> {
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Timed<T>) -> bool) {
        self.items.retain(|item| keep(item));
    }

    pub fn items(&self) -> &[Timed<T>] {
        &self.items
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Timed<T>> {
        self.items.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_sweep(&self) -> Option<SimTime> {
        self.pending_sweep
    }

    fn retain_fresh(&mut self, now: SimTime) {
        let window = self.window;
        self.items
            .retain(|item| now.saturating_since(item.created_at) < window);
    }
}

#[derive(Debug, Clone)]
pub struct TransientEffects {
    pub lasers: EffectSet<LaserBolt>,
    pub explosions: EffectSet<Burst>,
    pub sparks: EffectSet<Burst>,
    pub shatters: EffectSet<Burst>,
}

impl Default for TransientEffects {
    fn default() -> Self {
        Self {
            lasers: EffectSet::for_kind(EffectKind::Laser),
            explosions: EffectSet::for_kind(EffectKind::Explosion),
            sparks: EffectSet::for_kind(EffectKind::Spark),
            shatters: EffectSet::for_kind(EffectKind::Shatter),
        }
    }
}

impl TransientEffects {
    pub fn burst_set_mut(&mut self, kind: EffectKind) -> Option<&mut EffectSet<Burst>> {
        match kind {
            EffectKind::Laser => None,
            EffectKind::Explosion => Some(&mut self.explosions),
            EffectKind::Spark => Some(&mut self.sparks),
            EffectKind::Shatter => Some(&mut self.shatters),
        }
    }

    pub fn advance_lasers(&mut self, dt_seconds: f32) {
        for laser in self.lasers.iter_mut() {
            laser.data.advance(dt_seconds);
        }
    }

    pub fn poll(&mut self, now: SimTime) -> usize {
        self.lasers.poll(now)
            + self.explosions.poll(now)
            + self.sparks.poll(now)
            + self.shatters.poll(now)
    }

    pub fn live_count(&self) -> usize {
        self.lasers.len() + self.explosions.len() + self.sparks.len() + self.shatters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> SimTime {
        SimTime::from_millis(value)
    }

    #[test]
    fn single_effect_expires_after_window() {
        let mut set = EffectSet::new(Duration::from_millis(1000));
        set.trigger(ms(0), ());

        assert_eq!(set.poll(ms(999)), 0);
        assert_eq!(set.len(), 1);

        assert_eq!(set.poll(ms(1001)), 1);
        assert!(set.is_empty());
        assert_eq!(set.pending_sweep(), None);
    }

    #[test]
    fn second_trigger_does_not_evict_first_early() {
        let mut set = EffectSet::new(Duration::from_millis(1000));
        set.trigger(ms(0), "first");
        set.trigger(ms(500), "second");

        assert_eq!(set.len(), 2);
        set.poll(ms(999));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn rescheduling_keeps_only_one_pending_sweep() {
        let mut set = EffectSet::new(Duration::from_millis(500));
        set.trigger(ms(0), 1);
        set.trigger(ms(100), 2);
        set.trigger(ms(200), 3);

        assert_eq!(set.pending_sweep(), Some(ms(700)));
        // The deadline from the first trigger is gone, nothing fires at 500.
        assert_eq!(set.poll(ms(500)), 0);
        assert_eq!(set.len(), 3);

        assert_eq!(set.poll(ms(701)), 3);
        assert!(set.is_empty());
    }

    #[test]
    fn sweep_leaves_exactly_items_younger_than_window() {
        let mut set = EffectSet::new(Duration::from_millis(1000));
        set.trigger(ms(0), "old");
        set.trigger(ms(1200), "fresh");

        // Trigger-time filtering already dropped the expired item.
        assert_eq!(set.items().len(), 1);
        assert_eq!(set.items()[0].data, "fresh");
    }

    #[test]
    fn remove_by_id_only_touches_that_item() {
        let mut set = EffectSet::new(Duration::from_millis(1000));
        let first = set.trigger(ms(0), 'a');
        let _second = set.trigger(ms(10), 'b');

        let removed = set.remove(first).expect("removed");
        assert_eq!(removed.data, 'a');
        assert_eq!(set.len(), 1);
        assert!(set.remove(first).is_none());
    }

    #[test]
    fn laser_moves_along_heading_but_keeps_launch_ray() {
        let mut bolt = LaserBolt::launch(Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0), Quat::IDENTITY);
        bolt.advance(0.5);

        assert!((bolt.position.z - 150.0).abs() < 1e-4);
        let ray = bolt.ray();
        assert_eq!(ray.origin, Vec3::ZERO);
        assert!((ray.direction - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn grouped_poll_sweeps_every_kind() {
        let mut effects = TransientEffects::default();
        effects.sparks.trigger(ms(0), Burst::at(Vec3::ZERO));
        effects.explosions.trigger(ms(0), Burst::at(Vec3::ONE));

        assert_eq!(effects.poll(ms(600)), 1);
        assert_eq!(effects.live_count(), 1);
        assert_eq!(effects.poll(ms(1000)), 1);
        assert_eq!(effects.live_count(), 0);
    }
}
