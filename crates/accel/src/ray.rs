//! Ray and hit records.

use glam::Vec3;

/// Id reported for "no geometry / no instance".
pub const INVALID_ID: u32 = u32::MAX;

/// A ray with a valid parameter interval `[t_near, t_far]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub org: Vec3,
    pub dir: Vec3,
    pub t_near: f32,
    pub t_far: f32,
}

impl Ray {
    pub fn new(org: Vec3, dir: Vec3) -> Self {
        Self {
            org,
            dir,
            t_near: 0.0,
            t_far: f32::MAX,
        }
    }

    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.org + self.dir * t
    }
}

/// Closest-hit record.
///
/// `u`/`v` are the barycentric weights of the second and third triangle
/// vertex; `ng` is the unnormalized geometric normal in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub ng: Vec3,
    pub prim_id: u32,
    pub geom_id: u32,
    pub inst_id: u32,
}

impl Hit {
    /// Barycentric weights of the three triangle vertices.
    #[inline]
    pub fn uvw(&self) -> Vec3 {
        Vec3::new(1.0 - self.u - self.v, self.u, self.v)
    }
}
