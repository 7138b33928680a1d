//! Triangle soups for the static shapes the world modes place: platform and
//! door slabs (boxes) and rock hulls (icosahedra).

use glam::{Quat, Vec3};

use super::shapes::Triangle;

/// Axis-aligned box with outward facing, counter-clockwise triangles.
pub fn box_triangles(center: Vec3, half_extents: Vec3) -> Vec<Triangle> {
    // (normal, u, v) with u x v == normal.
    const FACES: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut triangles = Vec::with_capacity(12);
    for (normal, u, v) in FACES {
        let corner = |su: f32, sv: f32| center + (normal + u * su + v * sv) * half_extents;
        let p0 = corner(-1.0, -1.0);
        let p1 = corner(1.0, -1.0);
        let p2 = corner(1.0, 1.0);
        let p3 = corner(-1.0, 1.0);
        triangles.push(Triangle::new(p0, p1, p2));
        triangles.push(Triangle::new(p0, p2, p3));
    }
    triangles
}

const ICOSAHEDRON_FACES: [[usize; 3]; 20] = [
    [0, 11, 5],
    [0, 5, 1],
    [0, 1, 7],
    [0, 7, 10],
    [0, 10, 11],
    [1, 5, 9],
    [5, 11, 4],
    [11, 10, 2],
    [10, 7, 6],
    [7, 1, 8],
    [3, 9, 4],
    [3, 4, 2],
    [3, 2, 6],
    [3, 6, 8],
    [3, 8, 9],
    [4, 9, 5],
    [2, 4, 11],
    [6, 2, 10],
    [8, 6, 7],
    [9, 8, 1],
];

fn icosahedron_vertices() -> [Vec3; 12] {
    let t = (1.0 + 5.0_f32.sqrt()) * 0.5;
    [
        Vec3::new(-1.0, t, 0.0),
        Vec3::new(1.0, t, 0.0),
        Vec3::new(-1.0, -t, 0.0),
        Vec3::new(1.0, -t, 0.0),
        Vec3::new(0.0, -1.0, t),
        Vec3::new(0.0, 1.0, t),
        Vec3::new(0.0, -1.0, -t),
        Vec3::new(0.0, 1.0, -t),
        Vec3::new(t, 0.0, -1.0),
        Vec3::new(t, 0.0, 1.0),
        Vec3::new(-t, 0.0, -1.0),
        Vec3::new(-t, 0.0, 1.0),
    ]
}

/// Rock hull: an icosahedron of radius 0.5 stretched by `scale` per axis,
/// rotated and moved to `center`.
pub fn rock_hull(center: Vec3, scale: Vec3, rotation: Quat) -> Vec<Triangle> {
    let vertices = icosahedron_vertices()
        .map(|vertex| center + rotation * (vertex.normalize() * 0.5 * scale));

    ICOSAHEDRON_FACES
        .iter()
        .map(|[a, b, c]| {
            let triangle = Triangle::new(vertices[*a], vertices[*b], vertices[*c]);
            let centroid = (triangle.a + triangle.b + triangle.c) / 3.0;
            if triangle.normal().dot(centroid - center) < 0.0 {
                Triangle::new(triangle.a, triangle.c, triangle.b)
            } else {
                triangle
            }
        })
        .collect()
}
