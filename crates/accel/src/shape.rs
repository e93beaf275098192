//! Primitive sets a [`Blas`](crate::Blas) can be built over.

use std::sync::Arc;

use glam::Vec3;

use crate::aabb::Aabb;
use crate::mesh::{intersect_triangle, TriangleMesh};
use crate::spheres::{intersect_sphere, SphereSet};

/// One geometry slot of a BLAS.
#[derive(Debug, Clone)]
pub enum Shape {
    Triangles(Arc<TriangleMesh>),
    Spheres(Arc<SphereSet>),
}

impl Shape {
    pub fn prim_count(&self) -> usize {
        match self {
            Self::Triangles(mesh) => mesh.triangle_count(),
            Self::Spheres(set) => set.sphere_count(),
        }
    }

    pub fn prim_bounds(&self, prim: usize) -> Aabb {
        match self {
            Self::Triangles(mesh) => mesh.triangle_bounds(prim),
            Self::Spheres(set) => set.sphere_bounds(prim),
        }
    }

    pub fn bounds(&self) -> Aabb {
        match self {
            Self::Triangles(mesh) => mesh.bounds(),
            Self::Spheres(set) => set.bounds(),
        }
    }

    /// `(t, u, v, ng)` for primitive `prim`. Spheres report `u = v = 0`.
    pub(crate) fn intersect(
        &self,
        prim: usize,
        org: Vec3,
        dir: Vec3,
        t_min: f32,
        t_max: f32,
    ) -> Option<(f32, f32, f32, Vec3)> {
        match self {
            Self::Triangles(mesh) => {
                let tri = mesh.triangle(prim);
                let (t, u, v) = intersect_triangle(org, dir, tri, t_min, t_max)?;
                Some((t, u, v, (tri[1] - tri[0]).cross(tri[2] - tri[0])))
            }
            Self::Spheres(set) => {
                let center = set.centers[prim];
                let t = intersect_sphere(org, dir, center, set.radii[prim], t_min, t_max)?;
                Some((t, 0.0, 0.0, org + dir * t - center))
            }
        }
    }
}

impl From<Arc<TriangleMesh>> for Shape {
    fn from(mesh: Arc<TriangleMesh>) -> Self {
        Self::Triangles(mesh)
    }
}

impl From<Arc<SphereSet>> for Shape {
    fn from(set: Arc<SphereSet>) -> Self {
        Self::Spheres(set)
    }
}
