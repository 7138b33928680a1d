use glam::Vec3;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// `direction` is normalized; a zero direction yields a ray that hits nothing.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }

    pub fn is_degenerate(&self) -> bool {
        self.direction == Vec3::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first, first);
        for point in iter {
            bounds.min = bounds.min.min(point);
            bounds.max = bounds.max.max(point);
        }
        Some(bounds)
    }

    pub fn union(self, other: Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn expanded(self, amount: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(amount), self.max + Vec3::splat(amount))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Slab test. Returns the entry distance (0 when the origin is inside).
    pub fn ray_entry(&self, ray: &Ray) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            if direction.abs() < EPSILON {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / direction;
            let mut t0 = (self.min[axis] - origin) * inv;
            let mut t1 = (self.max[axis] - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }

    /// Separating-axis test between this box and a triangle.
    pub fn intersects_triangle(&self, triangle: &Triangle) -> bool {
        let center = self.center();
        let extents = self.half_extents();
        let v0 = triangle.a - center;
        let v1 = triangle.b - center;
        let v2 = triangle.c - center;
        let edges = [v1 - v0, v2 - v1, v0 - v2];

        for edge in edges {
            for unit in [Vec3::X, Vec3::Y, Vec3::Z] {
                let axis = unit.cross(edge);
                if axis.length_squared() < EPSILON {
                    continue;
                }
                if separated_on_axis(axis, [v0, v1, v2], extents) {
                    return false;
                }
            }
        }

        for unit in [Vec3::X, Vec3::Y, Vec3::Z] {
            if separated_on_axis(unit, [v0, v1, v2], extents) {
                return false;
            }
        }

        let normal = edges[0].cross(edges[1]);
        if normal.length_squared() < EPSILON {
            return true;
        }
        !separated_on_axis(normal, [v0, v1, v2], extents)
    }
}

fn separated_on_axis(axis: Vec3, vertices: [Vec3; 3], extents: Vec3) -> bool {
    let p0 = vertices[0].dot(axis);
    let p1 = vertices[1].dot(axis);
    let p2 = vertices[2].dot(axis);
    let radius = extents.x * axis.x.abs() + extents.y * axis.y.abs() + extents.z * axis.z.abs();
    p0.min(p1).min(p2) > radius || p0.max(p1).max(p2) < -radius
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    /// Unit normal from counter-clockwise winding.
    pub fn normal(&self) -> Vec3 {
        (self.b - self.a).cross(self.c - self.a).normalize_or_zero()
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(
            self.a.min(self.b).min(self.c),
            self.a.max(self.b).max(self.c),
        )
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal().dot(point - self.a)
    }

    /// True when the projection of `point` onto the triangle plane lies
    /// inside the triangle (edges included).
    pub fn contains_projection(&self, point: Vec3) -> bool {
        let v0 = self.c - self.a;
        let v1 = self.b - self.a;
        let v2 = point - self.a;
        let dot00 = v0.dot(v0);
        let dot01 = v0.dot(v1);
        let dot02 = v0.dot(v2);
        let dot11 = v1.dot(v1);
        let dot12 = v1.dot(v2);
        let denom = dot00 * dot11 - dot01 * dot01;
        if denom.abs() < EPSILON {
            return false;
        }
        let inv = 1.0 / denom;
        let u = (dot11 * dot02 - dot01 * dot12) * inv;
        let v = (dot00 * dot12 - dot01 * dot02) * inv;
        u >= 0.0 && v >= 0.0 && u + v <= 1.0
    }

    /// Two-sided Moller-Trumbore. Returns the hit distance along the ray.
    pub fn ray_distance(&self, ray: &Ray) -> Option<f32> {
        let edge1 = self.b - self.a;
        let edge2 = self.c - self.a;
        let p = ray.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let t_vec = ray.origin - self.a;
        let u = t_vec.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = t_vec.cross(edge1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let distance = edge2.dot(q) * inv_det;
        (distance >= 0.0).then_some(distance)
    }

    pub fn edges(&self) -> [(Vec3, Vec3); 3] {
        [(self.a, self.b), (self.b, self.c), (self.c, self.a)]
    }

    pub fn translated(&self, offset: Vec3) -> Triangle {
        Triangle::new(self.a + offset, self.b + offset, self.c + offset)
    }
}

/// Segment with radius. `end` is the upper point the player position follows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capsule {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
}

impl Capsule {
    pub fn new(start: Vec3, end: Vec3, radius: f32) -> Self {
        Self { start, end, radius }
    }

    /// Upright capsule whose lower segment point is `base`.
    pub fn upright(base: Vec3, height: f32, radius: f32) -> Self {
        Self::new(base, base + Vec3::Y * height, radius)
    }

    pub fn center(&self) -> Vec3 {
        (self.start + self.end) * 0.5
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.start += offset;
        self.end += offset;
    }

    /// Moves the capsule so that its upper point sits at `end`.
    pub fn place_end_at(&mut self, end: Vec3) {
        let offset = end - self.end;
        self.translate(offset);
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.start.min(self.end), self.start.max(self.end)).expanded(self.radius)
    }

    pub fn lowest_y(&self) -> f32 {
        self.start.y.min(self.end.y) - self.radius
    }
}

/// Closest points between segments `p1-q1` and `p2-q2`.
pub fn closest_points_between_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.dot(d1);
    let e = d2.dot(d2);
    let f = d2.dot(r);

    let (s, t) = if a <= EPSILON && e <= EPSILON {
        (0.0, 0.0)
    } else if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom.abs() > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    (p1 + d1 * s, p2 + d2 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor_triangle() -> Triangle {
        Triangle::new(
            Vec3::new(-10.0, 0.0, -10.0),
            Vec3::new(-10.0, 0.0, 10.0),
            Vec3::new(10.0, 0.0, 10.0),
        )
    }

    #[test]
    fn counter_clockwise_floor_faces_up() {
        let normal = floor_triangle().normal();
        assert!((normal.y - 1.0).abs() <= 1e-6);
    }

    #[test]
    fn ray_hits_triangle_from_either_side() {
        let tri = floor_triangle();
        let down = Ray::new(Vec3::new(-5.0, 3.0, 5.0), Vec3::NEG_Y);
        let up = Ray::new(Vec3::new(-5.0, -2.0, 5.0), Vec3::Y);

        assert!((tri.ray_distance(&down).expect("down") - 3.0).abs() <= 1e-5);
        assert!((tri.ray_distance(&up).expect("up") - 2.0).abs() <= 1e-5);
        let away = Ray::new(Vec3::new(-5.0, 3.0, 5.0), Vec3::Y);
        assert!(tri.ray_distance(&away).is_none());
    }

    #[test]
    fn projection_containment_ignores_height() {
        let tri = floor_triangle();
        assert!(tri.contains_projection(Vec3::new(-5.0, 40.0, 5.0)));
        assert!(!tri.contains_projection(Vec3::new(5.0, 0.0, -5.0)));
    }

    #[test]
    fn box_triangle_overlap_uses_separating_axes() {
        let unit = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        assert!(unit.intersects_triangle(&floor_triangle()));

        let above = floor_triangle().translated(Vec3::new(0.0, 2.0, 0.0));
        assert!(!unit.intersects_triangle(&above));

        // Bounding boxes overlap but the diagonal face misses the corner box.
        let corner = Aabb::new(Vec3::new(8.0, -0.5, -10.0), Vec3::new(10.0, 0.5, -8.0));
        assert!(corner.intersects(&floor_triangle().bounds()));
        assert!(!corner.intersects_triangle(&floor_triangle()));
    }

    #[test]
    fn ray_entry_reports_slab_distance() {
        let bounds = Aabb::new(Vec3::new(-1.0, -1.0, 4.0), Vec3::new(1.0, 1.0, 6.0));
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert!((bounds.ray_entry(&ray).expect("hit") - 4.0).abs() <= 1e-6);
        let miss = Ray::new(Vec3::new(3.0, 0.0, 0.0), Vec3::Z);
        assert!(bounds.ray_entry(&miss).is_none());
    }

    #[test]
    fn closest_points_on_crossing_segments() {
        let (on_first, on_second) = closest_points_between_segments(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, -1.0, 2.0),
            Vec3::new(0.0, 1.0, 2.0),
        );
        assert!(on_first.distance(Vec3::ZERO) <= 1e-6);
        assert!(on_second.distance(Vec3::new(0.0, 0.0, 2.0)) <= 1e-6);
    }

    #[test]
    fn capsule_bounds_include_radius() {
        let capsule = Capsule::upright(Vec3::ZERO, 1.0, 0.5);
        let bounds = capsule.bounds();
        assert!((bounds.min.y + 0.5).abs() <= 1e-6);
        assert!((bounds.max.y - 1.5).abs() <= 1e-6);
        assert!((capsule.lowest_y() + 0.5).abs() <= 1e-6);
    }
}
