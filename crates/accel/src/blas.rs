//! Bottom-level acceleration structure over a set of shapes.

use crate::aabb::Aabb;
use crate::build::{build_bvh, Bvh};
use crate::ray::{Hit, Ray, INVALID_ID};
use crate::shape::Shape;

/// Flattened primitive reference: (shape index, primitive index).
#[derive(Debug, Clone, Copy)]
struct PrimRef {
    geom: u32,
    prim: u32,
}

/// BVH over the primitives of several shapes.
///
/// The shape index becomes the hit's `geom_id`.
#[derive(Debug, Clone)]
pub struct Blas {
    shapes: Vec<Shape>,
    prims: Vec<PrimRef>,
    bvh: Bvh,
}

impl Blas {
    #[tracing::instrument(skip_all, fields(shapes = shapes.len()))]
    pub fn build(shapes: &[Shape]) -> Self {
        let mut prims = Vec::new();
        let mut aabbs = Vec::new();
        for (geom, shape) in shapes.iter().enumerate() {
            for prim in 0..shape.prim_count() {
                prims.push(PrimRef {
                    geom: geom as u32,
                    prim: prim as u32,
                });
                aabbs.push(shape.prim_bounds(prim));
            }
        }

        let bvh = build_bvh(&aabbs);
        tracing::debug!(prims = prims.len(), nodes = bvh.nodes.len(), "built BLAS");
        Self {
            shapes: shapes.to_vec(),
            prims,
            bvh,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prims.is_empty()
    }

    pub fn prim_count(&self) -> usize {
        self.prims.len()
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    /// Closest hit in object space. `inst_id` is left as [`INVALID_ID`].
    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        self.bvh.traverse(ray, |slot, t_max| {
            let r = self.prims[slot];
            let shape = &self.shapes[r.geom as usize];
            let (t, u, v, ng) = shape.intersect(r.prim as usize, ray.org, ray.dir, ray.t_near, t_max)?;
            best = Some(Hit {
                t,
                u,
                v,
                ng,
                prim_id: r.prim,
                geom_id: r.geom,
                inst_id: INVALID_ID,
            });
            Some(t)
        });
        best
    }
}
