pub mod mesh;
mod octree;
mod shapes;

pub use octree::{CapsuleHit, Octree, RayHit, MAX_DEPTH, MAX_TRIANGLES_PER_LEAF};
pub use shapes::{closest_points_between_segments, Aabb, Capsule, Ray, Triangle};

use tracing::debug;

/// Owns the current octree. World modes never patch it; they hand over the
/// full static triangle set and the tree is rebuilt from scratch.
#[derive(Debug, Default)]
pub struct CollisionWorld {
    octree: Octree,
    rebuilds: u64,
}

impl CollisionWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&mut self, triangles: Vec<Triangle>) {
        let triangle_count = triangles.len();
        self.octree = Octree::from_triangles(triangles);
        self.rebuilds = self.rebuilds.saturating_add(1);
        debug!(
            triangle_count,
            rebuilds = self.rebuilds,
            "collision_rebuilt"
        );
    }

    pub fn clear(&mut self) {
        self.rebuild(Vec::new());
    }

    pub fn intersect_capsule(&self, capsule: &Capsule) -> Option<CapsuleHit> {
        self.octree.intersect_capsule(capsule)
    }

    pub fn intersect_ray(&self, ray: &Ray, max_distance: f32) -> Option<RayHit> {
        self.octree.intersect_ray(ray, max_distance)
    }

    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn rebuild_replaces_previous_geometry() {
        let mut world = CollisionWorld::new();
        world.rebuild(mesh::box_triangles(Vec3::ZERO, Vec3::new(10.0, 0.125, 4.0)));
        let capsule = Capsule::upright(Vec3::new(0.0, 1.0, 0.0), 1.0, 1.0);
        assert!(world.intersect_capsule(&capsule).is_some());

        world.clear();
        assert!(world.octree().is_empty());
        assert!(world.intersect_capsule(&capsule).is_none());
        assert_eq!(world.rebuild_count(), 2);
    }
}
