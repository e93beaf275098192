//! Indexed triangle meshes.

use glam::{UVec3, Vec3};

use crate::aabb::Aabb;

/// Indexed triangle mesh. Indices are validated by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<UVec3>,
}

impl TriangleMesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<UVec3>) -> Self {
        Self { positions, indices }
    }

    /// Mesh with implicit indices `(3i, 3i+1, 3i+2)`.
    pub fn from_soup(positions: Vec<Vec3>) -> Self {
        let count = (positions.len() / 3) as u32;
        let indices = (0..count).map(|i| UVec3::new(3 * i, 3 * i + 1, 3 * i + 2)).collect();
        Self { positions, indices }
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn triangle(&self, prim: usize) -> [Vec3; 3] {
        let idx = self.indices[prim];
        [
            self.positions[idx.x as usize],
            self.positions[idx.y as usize],
            self.positions[idx.z as usize],
        ]
    }

    pub fn triangle_bounds(&self, prim: usize) -> Aabb {
        let mut b = Aabb::EMPTY;
        for p in self.triangle(prim) {
            b.grow_point(p);
        }
        b
    }

    /// Bounds of all referenced vertices.
    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        for prim in 0..self.triangle_count() {
            b.grow(&self.triangle_bounds(prim));
        }
        b
    }
}

/// Moller-Trumbore. Returns `(t, u, v)` inside `(t_min, t_max)`.
#[inline]
pub(crate) fn intersect_triangle(
    org: Vec3,
    dir: Vec3,
    [v0, v1, v2]: [Vec3; 3],
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32, f32)> {
    let e1 = v1 - v0;
    let e2 = v2 - v0;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = org - v0;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > t_min && t < t_max).then_some((t, u, v))
}
