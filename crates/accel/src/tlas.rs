//! Top-level acceleration structure over transformed BLAS instances.

use std::sync::Arc;

use glam::{Affine3A, Mat3, Mat4};

use crate::aabb::Aabb;
use crate::blas::Blas;
use crate::build::{build_bvh, Bvh};
use crate::ray::{Hit, Ray};

/// One placed copy of a [`Blas`].
#[derive(Debug, Clone)]
pub struct TlasInstance {
    /// Reported back as `Hit::inst_id`.
    pub inst_id: u32,
    pub blas: Arc<Blas>,
    xfm: Affine3A,
    inv_xfm: Affine3A,
    normal_xfm: Mat3,
    world_bounds: Aabb,
}

impl TlasInstance {
    pub fn new(inst_id: u32, blas: Arc<Blas>, transform: Mat4) -> Self {
        let xfm = Affine3A::from_mat4(transform);
        let inv_xfm = xfm.inverse();
        let normal_xfm = Mat3::from(xfm.matrix3).inverse().transpose();
        let world_bounds = blas.bounds().transformed(&xfm);
        Self {
            inst_id,
            blas,
            xfm,
            inv_xfm,
            normal_xfm,
            world_bounds,
        }
    }

    pub fn transform(&self) -> &Affine3A {
        &self.xfm
    }

    pub fn world_bounds(&self) -> Aabb {
        self.world_bounds
    }
}

/// BVH over instance bounds. Hits carry world-space normals.
#[derive(Debug, Clone)]
pub struct Tlas {
    instances: Vec<TlasInstance>,
    bvh: Bvh,
}

impl Tlas {
    #[tracing::instrument(skip_all, fields(instances = instances.len()))]
    pub fn build(instances: Vec<TlasInstance>) -> Self {
        let aabbs: Vec<Aabb> = instances.iter().map(|i| i.world_bounds).collect();
        let bvh = build_bvh(&aabbs);
        Self { instances, bvh }
    }

    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instances(&self) -> &[TlasInstance] {
        &self.instances
    }

    /// Union of all instance bounds in world space.
    pub fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    pub fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        self.bvh.traverse(ray, |slot, t_max| {
            let inst = &self.instances[slot];
            // Direction stays unnormalized so t is shared between spaces
            let local = Ray {
                org: inst.inv_xfm.transform_point3(ray.org),
                dir: inst.inv_xfm.transform_vector3(ray.dir),
                t_near: ray.t_near,
                t_far: t_max,
            };
            let mut hit = inst.blas.intersect(&local)?;
            hit.ng = inst.normal_xfm * hit.ng;
            hit.inst_id = inst.inst_id;
            let t = hit.t;
            best = Some(hit);
            Some(t)
        });
        best
    }
}
