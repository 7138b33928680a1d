use glam::Vec3;

use super::shapes::{closest_points_between_segments, Aabb, Capsule, Ray, Triangle};

pub const MAX_TRIANGLES_PER_LEAF: usize = 8;
pub const MAX_DEPTH: u32 = 16;
const BOUNDS_PADDING: f32 = 0.01;

/// Minimum translation that pushes a capsule out of the geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapsuleHit {
    pub normal: Vec3,
    pub depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub point: Vec3,
    /// Surface normal facing back toward the ray origin.
    pub normal: Vec3,
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    triangles: Vec<usize>,
    children: Vec<usize>,
}

/// Static triangle octree. Built once from a full triangle set and replaced
/// wholesale when the geometry changes.
#[derive(Debug, Clone, Default)]
pub struct Octree {
    triangles: Vec<Triangle>,
    nodes: Vec<Node>,
}

impl Octree {
    pub fn from_triangles(triangles: Vec<Triangle>) -> Self {
        let Some(bounds) = triangles
            .iter()
            .map(Triangle::bounds)
            .reduce(|acc, next| acc.union(next))
        else {
            return Self::default();
        };

        let mut octree = Self {
            nodes: vec![Node {
                bounds: bounds.expanded(BOUNDS_PADDING),
                triangles: (0..triangles.len()).collect(),
                children: Vec::new(),
            }],
            triangles,
        };
        octree.split(0, 0);
        octree
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    fn split(&mut self, node_index: usize, level: u32) {
        let node_triangles = self.nodes[node_index].triangles.len();
        if node_triangles <= MAX_TRIANGLES_PER_LEAF || level >= MAX_DEPTH {
            return;
        }

        let bounds = self.nodes[node_index].bounds;
        let half = bounds.half_extents();
        let mut buckets = Vec::with_capacity(8);
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    let min = bounds.min + Vec3::new(x as f32, y as f32, z as f32) * half;
                    let child_bounds = Aabb::new(min, min + half);
                    let members = self.nodes[node_index]
                        .triangles
                        .iter()
                        .copied()
                        .filter(|index| child_bounds.intersects_triangle(&self.triangles[*index]))
                        .collect::<Vec<_>>();
                    if !members.is_empty() {
                        buckets.push((child_bounds, members));
                    }
                }
            }
        }

        // Splitting cannot separate triangles that straddle every octant.
        if buckets
            .iter()
            .all(|(_, members)| members.len() == node_triangles)
        {
            return;
        }

        let mut children = Vec::with_capacity(buckets.len());
        for (child_bounds, members) in buckets {
            let child_index = self.nodes.len();
            self.nodes.push(Node {
                bounds: child_bounds,
                triangles: members,
                children: Vec::new(),
            });
            children.push(child_index);
        }
        self.nodes[node_index].triangles.clear();
        self.nodes[node_index].children = children.clone();

        for child in children {
            self.split(child, level + 1);
        }
    }

    fn collect_triangles(&self, query: &Aabb, out: &mut Vec<usize>) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bounds.intersects(query) {
                continue;
            }
            if node.children.is_empty() {
                out.extend(node.triangles.iter().copied());
            } else {
                stack.extend(node.children.iter().copied());
            }
        }
        out.sort_unstable();
        out.dedup();
    }

    /// Resolves the capsule against every nearby triangle in turn, moving a
    /// working copy after each contact, and reports the total displacement.
    pub fn intersect_capsule(&self, capsule: &Capsule) -> Option<CapsuleHit> {
        let mut candidates = Vec::new();
        self.collect_triangles(&capsule.bounds(), &mut candidates);
        if candidates.is_empty() {
            return None;
        }

        // Face contacts first so shared internal edges of a flat surface do
        // not add sideways pushes once the capsule is already out of the face.
        let mut working = *capsule;
        let mut hit_any = false;
        for index in &candidates {
            if let Some(contact) = face_contact(&self.triangles[*index], &working) {
                hit_any = true;
                working.translate(contact.normal * contact.depth);
            }
        }
        for index in &candidates {
            if let Some(contact) = edge_contact(&self.triangles[*index], &working) {
                hit_any = true;
                working.translate(contact.normal * contact.depth);
            }
        }

        if !hit_any {
            return None;
        }
        let displacement = working.center() - capsule.center();
        let depth = displacement.length();
        Some(CapsuleHit {
            normal: displacement.normalize_or_zero(),
            depth,
        })
    }

    pub fn intersect_ray(&self, ray: &Ray, max_distance: f32) -> Option<RayHit> {
        if self.nodes.is_empty() || ray.is_degenerate() {
            return None;
        }

        let mut best: Option<(f32, usize)> = None;
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            let Some(entry) = node.bounds.ray_entry(ray) else {
                continue;
            };
            let limit = best.map_or(max_distance, |(distance, _)| distance);
            if entry > limit {
                continue;
            }
            if node.children.is_empty() {
                for triangle_index in &node.triangles {
                    if let Some(distance) = self.triangles[*triangle_index].ray_distance(ray) {
                        let limit = best.map_or(max_distance, |(current, _)| current);
                        if distance <= limit {
                            best = Some((distance, *triangle_index));
                        }
                    }
                }
            } else {
                stack.extend(node.children.iter().copied());
            }
        }

        best.map(|(distance, triangle_index)| {
            let mut normal = self.triangles[triangle_index].normal();
            if normal.dot(ray.direction) > 0.0 {
                normal = -normal;
            }
            RayHit {
                distance,
                point: ray.at(distance),
                normal,
            }
        })
    }
}

/// Signed distances of both capsule end points to the triangle plane, minus
/// the radius. `None` when the capsule is fully in front of or far behind it.
fn plane_penetration(triangle: &Triangle, capsule: &Capsule) -> Option<(Vec3, f32, f32)> {
    let normal = triangle.normal();
    if normal == Vec3::ZERO {
        return None;
    }
    let radius = capsule.radius;
    let d1 = triangle.signed_distance(capsule.start) - radius;
    let d2 = triangle.signed_distance(capsule.end) - radius;
    if (d1 > 0.0 && d2 > 0.0) || (d1 < -radius && d2 < -radius) {
        return None;
    }
    Some((normal, d1, d2))
}

fn face_contact(triangle: &Triangle, capsule: &Capsule) -> Option<CapsuleHit> {
    let (normal, d1, d2) = plane_penetration(triangle, capsule)?;
    let spread = d1.abs() + d2.abs();
    let t = if spread > f32::EPSILON {
        (d1 / spread).abs()
    } else {
        0.0
    };
    let crossing = capsule.start.lerp(capsule.end, t);
    triangle.contains_projection(crossing).then(|| CapsuleHit {
        normal,
        depth: d1.min(d2).abs(),
    })
}

fn edge_contact(triangle: &Triangle, capsule: &Capsule) -> Option<CapsuleHit> {
    plane_penetration(triangle, capsule)?;
    let radius = capsule.radius;
    let radius_sq = radius * radius;
    for (edge_start, edge_end) in triangle.edges() {
        let (on_capsule, on_edge) =
            closest_points_between_segments(capsule.start, capsule.end, edge_start, edge_end);
        let gap_sq = on_capsule.distance_squared(on_edge);
        if gap_sq >= radius_sq {
            continue;
        }
        let push = (on_capsule - on_edge).normalize_or_zero();
        if push == Vec3::ZERO {
            continue;
        }
        return Some(CapsuleHit {
            normal: push,
            depth: radius - gap_sq.sqrt(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::super::mesh::box_triangles;
    use super::*;

    fn floor(half_size: f32) -> Vec<Triangle> {
        let a = Vec3::new(-half_size, 0.0, -half_size);
        let b = Vec3::new(-half_size, 0.0, half_size);
        let c = Vec3::new(half_size, 0.0, half_size);
        let d = Vec3::new(half_size, 0.0, -half_size);
        vec![Triangle::new(a, b, c), Triangle::new(a, c, d)]
    }

    #[test]
    fn empty_tree_never_reports_contact() {
        let tree = Octree::from_triangles(Vec::new());
        let capsule = Capsule::upright(Vec3::ZERO, 1.0, 1.0);
        assert!(tree.is_empty());
        assert!(tree.intersect_capsule(&capsule).is_none());
        assert!(tree
            .intersect_ray(&Ray::new(Vec3::ZERO, Vec3::NEG_Y), 100.0)
            .is_none());
    }

    #[test]
    fn capsule_sunk_into_floor_is_pushed_up_by_depth() {
        let tree = Octree::from_triangles(floor(10.0));
        let depth = 0.3;
        let capsule = Capsule::upright(Vec3::new(0.5, 1.0 - depth, -0.25), 1.0, 1.0);

        let hit = tree.intersect_capsule(&capsule).expect("overlap");
        assert!((hit.normal.y - 1.0).abs() <= 1e-5);
        assert!((hit.depth - depth).abs() <= 1e-5);
    }

    #[test]
    fn capsule_above_floor_is_clear() {
        let tree = Octree::from_triangles(floor(10.0));
        let capsule = Capsule::upright(Vec3::new(0.0, 1.5, 0.0), 1.0, 1.0);
        assert!(tree.intersect_capsule(&capsule).is_none());
    }

    #[test]
    fn capsule_against_wall_is_pushed_sideways() {
        let wall = box_triangles(Vec3::new(0.0, 0.0, 5.0), Vec3::new(10.0, 4.0, 0.125));
        let tree = Octree::from_triangles(wall);
        // Capsule axis sits 0.625 from the wall face at z=4.875, radius 1.
        let capsule = Capsule::upright(Vec3::new(0.0, -0.5, 4.25), 1.0, 1.0);

        let hit = tree.intersect_capsule(&capsule).expect("wall contact");
        assert!((hit.normal.z + 1.0).abs() <= 1e-4);
        assert!((hit.depth - 0.375).abs() <= 1e-4);
    }

    #[test]
    fn capsule_touching_edge_uses_edge_normal() {
        let tree = Octree::from_triangles(floor(1.0));
        // Beside the +x edge, slightly below the surface.
        let capsule = Capsule::upright(Vec3::new(1.5, -0.5, 0.0), 1.0, 1.0);

        let hit = tree.intersect_capsule(&capsule).expect("edge contact");
        assert!(hit.normal.x > 0.9);
        assert!((hit.depth - 0.5).abs() <= 1e-4);
    }

    #[test]
    fn large_mesh_splits_and_still_finds_contacts() {
        let mut triangles = Vec::new();
        for ix in -5..5 {
            for iz in -5..5 {
                let offset = Vec3::new(ix as f32 * 2.0 + 1.0, 0.0, iz as f32 * 2.0 + 1.0);
                triangles.extend(floor(1.0).into_iter().map(|tri| tri.translated(offset)));
            }
        }
        let tree = Octree::from_triangles(triangles);
        assert!(tree.nodes.len() > 1);

        let capsule = Capsule::upright(Vec3::new(3.3, 0.8, -6.7), 1.0, 1.0);
        let hit = tree.intersect_capsule(&capsule).expect("contact");
        assert!((hit.normal.y - 1.0).abs() <= 1e-4);
        assert!((hit.depth - 0.2).abs() <= 1e-4);
    }

    #[test]
    fn ray_hit_reports_nearest_surface_facing_origin() {
        let mut triangles = floor(10.0);
        triangles.extend(
            floor(10.0)
                .into_iter()
                .map(|tri| tri.translated(Vec3::new(0.0, -5.0, 0.0))),
        );
        let tree = Octree::from_triangles(triangles);

        let ray = Ray::new(Vec3::new(1.0, 4.0, 1.0), Vec3::NEG_Y);
        let hit = tree.intersect_ray(&ray, 100.0).expect("hit");
        assert!((hit.distance - 4.0).abs() <= 1e-5);
        assert!((hit.normal.y - 1.0).abs() <= 1e-5);

        let from_below = Ray::new(Vec3::new(1.0, -8.0, 1.0), Vec3::Y);
        let hit = tree.intersect_ray(&from_below, 100.0).expect("hit from below");
        assert!((hit.point.y + 5.0).abs() <= 1e-5);
        assert!((hit.normal.y + 1.0).abs() <= 1e-5);

        assert!(tree.intersect_ray(&ray, 2.0).is_none());
    }
}
