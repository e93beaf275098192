//! Math type re-exports and sampling utilities.
//!
//! This module re-exports types from `glam` and provides the interval
//! and box types used by parameters, plus the interpolation and
//! compositing helpers shared by arrays, fields and the renderer.

pub use glam::{
    IVec2, IVec3, IVec4,
    Mat3, Mat4,
    UVec2, UVec3, UVec4,
    Vec2, Vec3, Vec4,
};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Closed 1D interval.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Box1 {
    pub lower: f32,
    pub upper: f32,
}

impl Box1 {
    pub const EMPTY: Self = Self {
        lower: f32::INFINITY,
        upper: f32::NEG_INFINITY,
    };

    #[inline]
    pub const fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    /// Signed extent; negative when empty.
    #[inline]
    pub fn size(&self) -> f32 {
        self.upper - self.lower
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    #[inline]
    pub fn contains(&self, v: f32) -> bool {
        v >= self.lower && v <= self.upper
    }

    /// Map `v` into `[0, 1]` relative to this interval (unclamped).
    #[inline]
    pub fn normalize(&self, v: f32) -> f32 {
        let s = self.size();
        if s == 0.0 {
            0.0
        } else {
            (v - self.lower) / s
        }
    }
}

impl Default for Box1 {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

impl fmt::Debug for Box1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Box1({} - {})", self.lower, self.upper)
    }
}

/// 3D bounding box with single precision.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Box3 {
    pub lower: Vec3,
    pub upper: Vec3,
}

impl Box3 {
    /// Empty bounding box (inverted, will expand on first point).
    pub const EMPTY: Self = Self {
        lower: Vec3::splat(f32::INFINITY),
        upper: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    pub const fn new(lower: Vec3, upper: Vec3) -> Self {
        Self { lower, upper }
    }

    /// Check if this box is empty (has no volume).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower.x > self.upper.x || self.lower.y > self.upper.y || self.lower.z > self.upper.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn extend_point(&mut self, p: Vec3) {
        self.lower = self.lower.min(p);
        self.upper = self.upper.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn extend(&mut self, other: &Self) {
        if !other.is_empty() {
            self.lower = self.lower.min(other.lower);
            self.upper = self.upper.max(other.upper);
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.lower + self.upper) * 0.5
    }

    #[inline]
    pub fn size(&self) -> Vec3 {
        self.upper - self.lower
    }

    /// Bounds of the eight corners under `xfm`.
    pub fn transformed(&self, xfm: &Mat4) -> Self {
        if self.is_empty() {
            return Self::EMPTY;
        }
        let mut out = Self::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.lower.x } else { self.upper.x },
                if i & 2 == 0 { self.lower.y } else { self.upper.y },
                if i & 4 == 0 { self.lower.z } else { self.upper.z },
            );
            out.extend_point(xfm.transform_point3(corner));
        }
        out
    }

    /// Parametric overlap of a ray with this box, clipped to `t`.
    pub fn intersect_ray(&self, org: Vec3, dir: Vec3, t: Box1) -> Box1 {
        let inv = dir.recip();
        let t0 = (self.lower - org) * inv;
        let t1 = (self.upper - org) * inv;
        Box1::new(
            t0.min(t1).max_element().max(t.lower),
            t0.max(t1).min_element().min(t.upper),
        )
    }
}

impl Default for Box3 {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Box3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Box3({:?} - {:?})", self.lower, self.upper)
    }
}

impl From<prism_accel::Aabb> for Box3 {
    fn from(b: prism_accel::Aabb) -> Self {
        if b.is_empty() {
            Self::EMPTY
        } else {
            Self::new(b.min, b.max)
        }
    }
}

// === Interpolation ===

/// Texture/array addressing outside `[0, size)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

impl WrapMode {
    pub fn from_name(name: &str) -> Self {
        match name {
            "repeat" => Self::Repeat,
            "mirrorRepeat" => Self::MirrorRepeat,
            _ => Self::ClampToEdge,
        }
    }

    /// Resolve a possibly out-of-range index.
    pub fn wrap(self, i: i64, size: usize) -> usize {
        let n = size.max(1) as i64;
        let idx = match self {
            Self::ClampToEdge => i.clamp(0, n - 1),
            Self::Repeat => i.rem_euclid(n),
            Self::MirrorRepeat => {
                let m = i.rem_euclid(2 * n);
                if m < n {
                    m
                } else {
                    2 * n - 1 - m
                }
            }
        };
        idx as usize
    }
}

/// Lower/upper sample indices and blend fraction for one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interpolant {
    pub lower: i64,
    pub upper: i64,
    pub frac: f32,
}

/// Locate `v` in `[0, 1]` on an axis of `size` samples.
///
/// With `texel_centers` the samples sit at texel centers (image lookup);
/// otherwise the first and last sample sit exactly at 0 and 1.
pub fn interpolant(v: f32, size: usize, texel_centers: bool) -> Interpolant {
    let scale = size as f32;
    let pos = if texel_centers {
        (v - 0.5 / scale) * scale
    } else {
        v * (scale - 1.0)
    };
    let lower = pos.floor();
    Interpolant {
        lower: lower as i64,
        upper: lower as i64 + 1,
        frac: pos - lower,
    }
}

/// Front-to-back "under" operator: `dst += src * (1 - alpha)`.
#[inline]
pub fn accumulate<T>(dst: &mut T, src: T, alpha: f32)
where
    T: Copy + std::ops::Add<Output = T> + std::ops::Mul<f32, Output = T>,
{
    *dst = *dst + src * (1.0 - alpha);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box3_extend() {
        let mut b = Box3::EMPTY;
        assert!(b.is_empty());
        b.extend_point(Vec3::new(1.0, 2.0, 3.0));
        b.extend_point(Vec3::new(-1.0, 0.0, 5.0));
        assert_eq!(b.lower, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(b.upper, Vec3::new(1.0, 2.0, 5.0));

        let before = b;
        b.extend(&Box3::EMPTY);
        assert_eq!(b, before);
    }

    #[test]
    fn test_box3_ray_overlap() {
        let b = Box3::new(Vec3::ZERO, Vec3::ONE);
        let t = b.intersect_ray(Vec3::new(0.5, 0.5, -2.0), Vec3::Z, Box1::new(0.0, f32::MAX));
        assert_eq!(t, Box1::new(2.0, 3.0));
        let clipped = b.intersect_ray(Vec3::new(0.5, 0.5, -2.0), Vec3::Z, Box1::new(0.0, 2.5));
        assert_eq!(clipped.upper, 2.5);
        let miss = b.intersect_ray(Vec3::new(5.0, 0.5, -2.0), Vec3::Z, Box1::new(0.0, f32::MAX));
        assert!(miss.is_empty());
    }

    #[test]
    fn test_box1_normalize() {
        let r = Box1::new(2.0, 4.0);
        assert_eq!(r.normalize(3.0), 0.5);
        assert_eq!(Box1::new(1.0, 1.0).normalize(5.0), 0.0);
        assert_eq!(Box1::default(), Box1::new(0.0, 1.0));
    }

    #[test]
    fn test_wrap_modes() {
        assert_eq!(WrapMode::ClampToEdge.wrap(-3, 4), 0);
        assert_eq!(WrapMode::ClampToEdge.wrap(9, 4), 3);
        assert_eq!(WrapMode::Repeat.wrap(-1, 4), 3);
        assert_eq!(WrapMode::Repeat.wrap(5, 4), 1);
        assert_eq!(WrapMode::MirrorRepeat.wrap(4, 4), 3);
        assert_eq!(WrapMode::MirrorRepeat.wrap(-1, 4), 0);
    }

    #[test]
    fn test_interpolant() {
        let i = interpolant(0.5, 5, false);
        assert_eq!((i.lower, i.upper), (2, 3));
        assert_eq!(i.frac, 0.0);

        let i = interpolant(0.5, 2, true);
        assert_eq!((i.lower, i.upper), (0, 1));
        assert!((i.frac - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_accumulate_under() {
        let mut c = Vec3::new(0.2, 0.0, 0.0);
        accumulate(&mut c, Vec3::new(0.0, 1.0, 0.0), 0.25);
        assert_eq!(c, Vec3::new(0.2, 0.75, 0.0));

        let mut o = 0.5f32;
        accumulate(&mut o, 1.0, 0.5);
        assert_eq!(o, 1.0);
    }
}
