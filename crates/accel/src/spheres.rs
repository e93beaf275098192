//! Sphere sets: one center and radius per primitive.

use glam::Vec3;

use crate::aabb::Aabb;

/// Independent spheres. `centers` and `radii` have equal length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SphereSet {
    pub centers: Vec<Vec3>,
    pub radii: Vec<f32>,
}

impl SphereSet {
    pub fn new(centers: Vec<Vec3>, radii: Vec<f32>) -> Self {
        debug_assert_eq!(centers.len(), radii.len());
        Self { centers, radii }
    }

    #[inline]
    pub fn sphere_count(&self) -> usize {
        self.centers.len().min(self.radii.len())
    }

    pub fn sphere_bounds(&self, prim: usize) -> Aabb {
        let r = Vec3::splat(self.radii[prim].abs());
        let c = self.centers[prim];
        Aabb::new(c - r, c + r)
    }

    pub fn bounds(&self) -> Aabb {
        let mut b = Aabb::EMPTY;
        for prim in 0..self.sphere_count() {
            b.grow(&self.sphere_bounds(prim));
        }
        b
    }
}

/// Nearest root of `|org + t * dir - center| = radius` inside
/// `(t_min, t_max)`. A ray starting inside hits the far side.
#[inline]
pub(crate) fn intersect_sphere(
    org: Vec3,
    dir: Vec3,
    center: Vec3,
    radius: f32,
    t_min: f32,
    t_max: f32,
) -> Option<f32> {
    let oc = org - center;
    let a = dir.length_squared();
    if a == 0.0 {
        return None;
    }
    let half_b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    let disc = half_b * half_b - a * c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    [(-half_b - sq) / a, (-half_b + sq) / a]
        .into_iter()
        .find(|t| *t > t_min && *t < t_max)
}
