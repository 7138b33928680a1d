use glam::Vec3;

use crate::collision::{Aabb, Ray};
use crate::effects::{EffectId, EffectSet, LaserBolt};
use crate::registry::{EntityId, EntityRegistry, RenderHandle};

/// Maximum distance between a bolt and the point its launch ray hits for the
/// hit to count.
pub const LASER_HIT_RANGE: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PickShape {
    Sphere { center: Vec3, radius: f32 },
    /// Flat two-sided disc.
    Disc { center: Vec3, normal: Vec3, radius: f32 },
    Box(Aabb),
}

impl PickShape {
    pub fn center(&self) -> Vec3 {
        match self {
            PickShape::Sphere { center, .. } | PickShape::Disc { center, .. } => *center,
            PickShape::Box(bounds) => bounds.center(),
        }
    }

    pub fn translated(&self, offset: Vec3) -> PickShape {
        match *self {
            PickShape::Sphere { center, radius } => PickShape::Sphere {
                center: center + offset,
                radius,
            },
            PickShape::Disc {
                center,
                normal,
                radius,
            } => PickShape::Disc {
                center: center + offset,
                normal,
                radius,
            },
            PickShape::Box(bounds) => PickShape::Box(Aabb::new(bounds.min + offset, bounds.max + offset)),
        }
    }

    /// Distance along the ray and the surface normal facing the ray origin.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, Vec3)> {
        match *self {
            PickShape::Sphere { center, radius } => {
                let to_origin = ray.origin - center;
                let b = to_origin.dot(ray.direction);
                let c = to_origin.length_squared() - radius * radius;
                let discriminant = b * b - c;
                if discriminant < 0.0 {
                    return None;
                }
                let root = discriminant.sqrt();
                let near = -b - root;
                let distance = if near >= 0.0 { near } else { -b + root };
                if distance < 0.0 {
                    return None;
                }
                let normal = (ray.at(distance) - center).normalize_or_zero();
                Some((distance, facing(normal, ray.direction)))
            }
            PickShape::Disc {
                center,
                normal,
                radius,
            } => {
                let normal = normal.normalize_or_zero();
                let denom = normal.dot(ray.direction);
                if denom.abs() < 1e-6 {
                    return None;
                }
                let distance = (center - ray.origin).dot(normal) / denom;
                if distance < 0.0 || ray.at(distance).distance_squared(center) > radius * radius {
                    return None;
                }
                Some((distance, facing(normal, ray.direction)))
            }
            PickShape::Box(bounds) => {
                let distance = bounds.ray_entry(ray)?;
                let local = (ray.at(distance) - bounds.center()) / bounds.half_extents().max(Vec3::splat(1e-6));
                let abs = local.abs();
                let normal = if abs.x >= abs.y && abs.x >= abs.z {
                    Vec3::X * local.x.signum()
                } else if abs.y >= abs.z {
                    Vec3::Y * local.y.signum()
                } else {
                    Vec3::Z * local.z.signum()
                };
                Some((distance, facing(normal, ray.direction)))
            }
        }
    }
}

fn facing(normal: Vec3, direction: Vec3) -> Vec3 {
    if normal.dot(direction) > 0.0 {
        -normal
    } else {
        normal
    }
}

/// A raycastable visual. `parent` links decorative parts (switch plates, ring
/// rims) to the visual that is actually bound in the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pickable {
    pub handle: RenderHandle,
    pub parent: Option<RenderHandle>,
    pub shape: PickShape,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    pub handle: RenderHandle,
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

#[derive(Debug, Clone, Default)]
pub struct InteractiveGroup {
    pickables: Vec<Pickable>,
}

impl InteractiveGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the pickable with the same handle.
    pub fn insert(&mut self, pickable: Pickable) {
        match self
            .pickables
            .iter_mut()
            .find(|existing| existing.handle == pickable.handle)
        {
            Some(existing) => *existing = pickable,
            None => self.pickables.push(pickable),
        }
    }

    /// Removes `handle` and every part parented to it.
    pub fn remove(&mut self, handle: RenderHandle) -> bool {
        let before = self.pickables.len();
        self.pickables
            .retain(|pickable| pickable.handle != handle && pickable.parent != Some(handle));
        before != self.pickables.len()
    }

    pub fn get(&self, handle: RenderHandle) -> Option<&Pickable> {
        self.pickables.iter().find(|pickable| pickable.handle == handle)
    }

    pub fn get_mut(&mut self, handle: RenderHandle) -> Option<&mut Pickable> {
        self.pickables
            .iter_mut()
            .find(|pickable| pickable.handle == handle)
    }

    pub fn parent_of(&self, handle: RenderHandle) -> Option<RenderHandle> {
        self.get(handle).and_then(|pickable| pickable.parent)
    }

    pub fn clear(&mut self) {
        self.pickables.clear();
    }

    pub fn len(&self) -> usize {
        self.pickables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pickables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pickable> {
        self.pickables.iter()
    }

    pub fn intersect(&self, ray: &Ray) -> Option<PickHit> {
        if ray.is_degenerate() {
            return None;
        }
        self.pickables
            .iter()
            .filter_map(|pickable| {
                pickable
                    .shape
                    .intersect(ray)
                    .map(|(distance, normal)| PickHit {
                        handle: pickable.handle,
                        distance,
                        point: ray.at(distance),
                        normal,
                    })
            })
            .min_by(|left, right| left.distance.total_cmp(&right.distance))
    }

    /// Walks up from `handle` to the first visual the registry knows.
    pub fn resolve_entity<'r>(
        &self,
        handle: RenderHandle,
        registry: &'r EntityRegistry,
    ) -> Option<&'r EntityId> {
        let mut cursor = Some(handle);
        for _ in 0..=self.pickables.len() {
            let current = cursor?;
            if let Some(id) = registry.resolve(current) {
                return Some(id);
            }
            cursor = self.parent_of(current);
        }
        None
    }
}

/// The entity under the crosshair, refreshed every tick.
#[derive(Debug, Clone, Default)]
pub struct Targeting {
    current: Option<EntityId>,
    last_hit: Option<PickHit>,
}

impl Targeting {
    pub fn update(
        &mut self,
        ray: &Ray,
        group: &InteractiveGroup,
        registry: &EntityRegistry,
    ) -> Option<&EntityId> {
        self.last_hit = group.intersect(ray);
        self.current = self
            .last_hit
            .and_then(|hit| group.resolve_entity(hit.handle, registry))
            .cloned();
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&EntityId> {
        self.current.as_ref()
    }

    pub fn last_hit(&self) -> Option<PickHit> {
        self.last_hit
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.last_hit = None;
    }

    /// Drops the target if it is `id`. Used when an entity leaves the world
    /// between ticks.
    pub fn forget(&mut self, id: &EntityId) {
        if self.current.as_ref() == Some(id) {
            self.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaserStrike {
    pub bolt: EffectId,
    /// `None` when the struck visual has no live entity behind it.
    pub entity: Option<EntityId>,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Tests every live bolt's launch ray against `group`. A strike counts only
/// when the hit point is within [`LASER_HIT_RANGE`] of where the bolt is now.
/// Every strike consumes its bolt, bound to an entity or not.
pub fn laser_strikes(
    lasers: &EffectSet<LaserBolt>,
    group: &InteractiveGroup,
    registry: &EntityRegistry,
) -> Vec<LaserStrike> {
    lasers
        .items()
        .iter()
        .filter_map(|bolt| {
            let hit = group.intersect(&bolt.data.ray())?;
            if hit.point.distance(bolt.data.position) >= LASER_HIT_RANGE {
                return None;
            }
            let entity = group.resolve_entity(hit.handle, registry).cloned();
            Some(LaserStrike {
                bolt: bolt.id,
                entity,
                point: hit.point,
                normal: hit.normal,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use glam::Quat;
    use serde_json::json;

    use super::*;
    use crate::clock::SimTime;
    use crate::registry::{EntityKind, PlacementPolicy, Spatial};

    struct Origin;

    impl PlacementPolicy for Origin {
        fn place(&mut self, _kind: EntityKind, _spawn_counter: u64) -> Spatial {
            Spatial::default()
        }
    }

    fn registry_with(id: &str, handle: RenderHandle) -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry
            .spawn(EntityKind::Activity, json!({ "id": id }), &mut Origin)
            .expect("spawn");
        registry
            .bind_render_handle(&EntityId::from(id), handle)
            .expect("bind");
        registry
    }

    fn sphere(raw: u64, center: Vec3, radius: f32) -> Pickable {
        Pickable {
            handle: RenderHandle::from_raw(raw),
            parent: None,
            shape: PickShape::Sphere { center, radius },
        }
    }

    #[test]
    fn nearest_pickable_wins() {
        let mut group = InteractiveGroup::new();
        group.insert(sphere(1, Vec3::new(0.0, 0.0, 30.0), 2.0));
        group.insert(sphere(2, Vec3::new(0.0, 0.0, 10.0), 2.0));

        let hit = group
            .intersect(&Ray::new(Vec3::ZERO, Vec3::Z))
            .expect("hit");
        assert_eq!(hit.handle, RenderHandle::from_raw(2));
        assert!((hit.distance - 8.0).abs() <= 1e-5);
        assert!((hit.normal.z + 1.0).abs() <= 1e-5);
    }

    #[test]
    fn disc_is_hit_from_either_side_within_radius() {
        let disc = PickShape::Disc {
            center: Vec3::new(0.0, 0.0, 5.0),
            normal: Vec3::Z,
            radius: 1.0,
        };
        let (distance, normal) = disc
            .intersect(&Ray::new(Vec3::new(0.5, 0.0, 0.0), Vec3::Z))
            .expect("front");
        assert!((distance - 5.0).abs() <= 1e-5);
        assert!((normal.z + 1.0).abs() <= 1e-5);

        assert!(disc
            .intersect(&Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z))
            .is_some());
        assert!(disc
            .intersect(&Ray::new(Vec3::new(1.5, 0.0, 0.0), Vec3::Z))
            .is_none());
    }

    #[test]
    fn box_reports_entry_face() {
        let shape = PickShape::Box(Aabb::new(Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 6.0)));
        let (distance, normal) = shape
            .intersect(&Ray::new(Vec3::ZERO, Vec3::Z))
            .expect("hit");
        assert!((distance - 4.0).abs() <= 1e-5);
        assert!((normal.z + 1.0).abs() <= 1e-5);
    }

    #[test]
    fn update_walks_parent_chain_to_registered_visual() {
        let root = RenderHandle::from_raw(10);
        let registry = registry_with("a1", root);

        let mut group = InteractiveGroup::new();
        group.insert(Pickable {
            handle: RenderHandle::from_raw(11),
            parent: Some(root),
            shape: PickShape::Sphere {
                center: Vec3::new(0.0, 0.0, 5.0),
                radius: 1.0,
            },
        });

        let mut targeting = Targeting::default();
        let target = targeting.update(&Ray::new(Vec3::ZERO, Vec3::Z), &group, &registry);
        assert_eq!(target, Some(&EntityId::from("a1")));

        targeting.update(&Ray::new(Vec3::ZERO, Vec3::NEG_Z), &group, &registry);
        assert!(targeting.current().is_none());
        assert!(targeting.last_hit().is_none());
    }

    #[test]
    fn unbound_hit_clears_target() {
        let registry = EntityRegistry::new();
        let mut group = InteractiveGroup::new();
        group.insert(sphere(3, Vec3::new(0.0, 0.0, 5.0), 1.0));

        let mut targeting = Targeting::default();
        assert!(targeting
            .update(&Ray::new(Vec3::ZERO, Vec3::Z), &group, &registry)
            .is_none());
        assert!(targeting.last_hit().is_some());
    }

    #[test]
    fn removing_visual_drops_its_parts() {
        let mut group = InteractiveGroup::new();
        let root = RenderHandle::from_raw(1);
        group.insert(sphere(1, Vec3::ZERO, 1.0));
        group.insert(Pickable {
            handle: RenderHandle::from_raw(2),
            parent: Some(root),
            shape: PickShape::Sphere {
                center: Vec3::ONE,
                radius: 1.0,
            },
        });
        group.insert(sphere(3, Vec3::splat(5.0), 1.0));

        assert!(group.remove(root));
        assert_eq!(group.len(), 1);
        assert!(!group.remove(root));
    }

    #[test]
    fn laser_counts_only_near_its_current_position() {
        let handle = RenderHandle::from_raw(7);
        let registry = registry_with("rock", handle);
        let mut group = InteractiveGroup::new();
        group.insert(sphere(7, Vec3::new(0.0, 0.0, 100.0), 5.0));

        let mut lasers = EffectSet::new(crate::effects::LASER_WINDOW);
        let bolt = lasers.trigger(
            SimTime::ZERO,
            LaserBolt::launch(Vec3::ZERO, Vec3::Z, Quat::IDENTITY),
        );

        assert!(laser_strikes(&lasers, &group, &registry).is_empty());

        for timed in lasers.iter_mut() {
            timed.data.advance(0.2);
        }
        let strikes = laser_strikes(&lasers, &group, &registry);
        assert_eq!(strikes.len(), 1);
        assert_eq!(strikes[0].bolt, bolt);
        assert_eq!(strikes[0].entity, Some(EntityId::from("rock")));
        assert!((strikes[0].point.z - 95.0).abs() <= 1e-4);
    }

    #[test]
    fn unbound_visual_still_stops_the_bolt() {
        let registry = EntityRegistry::new();
        let mut group = InteractiveGroup::new();
        group.insert(sphere(4, Vec3::new(0.0, 0.0, 20.0), 2.0));

        let mut lasers = EffectSet::new(crate::effects::LASER_WINDOW);
        let bolt = lasers.trigger(
            SimTime::ZERO,
            LaserBolt::launch(Vec3::ZERO, Vec3::Z, Quat::IDENTITY),
        );

        let strikes = laser_strikes(&lasers, &group, &registry);
        assert_eq!(strikes.len(), 1);
        assert_eq!(strikes[0].bolt, bolt);
        assert!(strikes[0].entity.is_none());
    }
}
