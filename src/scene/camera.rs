//! Cameras map normalized screen coordinates in `[0, 1]^2` to primary rays.

use prism_accel::Ray;

use crate::core::{ObjectContext, ObjectImpl, ParameterTable};
use crate::util::{Vec2, Vec3};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CameraKind {
    Perspective,
    Orthographic,
}

impl CameraKind {
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "perspective" => Some(Self::Perspective),
            "orthographic" => Some(Self::Orthographic),
            _ => None,
        }
    }
}

/// Image plane spanned from its lower-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CameraData {
    kind: CameraKind,
    pos: Vec3,
    dir: Vec3,
    /// Lower-left corner: a direction (perspective) or a point (orthographic)
    corner: Vec3,
    du: Vec3,
    dv: Vec3,
}

impl CameraData {
    fn new(kind: CameraKind, pos: Vec3, dir: Vec3, up: Vec3, plane: Vec2) -> Self {
        let du = dir.cross(up).normalize_or_zero() * plane.x;
        let dv = du.cross(dir).normalize_or_zero() * plane.y;
        let base = match kind {
            CameraKind::Perspective => dir,
            CameraKind::Orthographic => pos,
        };
        Self {
            kind,
            pos,
            dir,
            corner: base - 0.5 * du - 0.5 * dv,
            du,
            dv,
        }
    }

    pub fn perspective(pos: Vec3, dir: Vec3, up: Vec3, fovy: f32, aspect: f32) -> Self {
        let h = 2.0 * (0.5 * fovy).tan();
        Self::new(CameraKind::Perspective, pos, dir.normalize_or_zero(), up, Vec2::new(h * aspect, h))
    }

    pub fn orthographic(pos: Vec3, dir: Vec3, up: Vec3, height: f32, aspect: f32) -> Self {
        Self::new(
            CameraKind::Orthographic,
            pos,
            dir.normalize_or_zero(),
            up,
            Vec2::new(height * aspect, height),
        )
    }

    pub fn ray(&self, screen: Vec2) -> Ray {
        let offset = screen.x * self.du + screen.y * self.dv;
        match self.kind {
            CameraKind::Perspective => Ray::new(self.pos, (self.corner + offset).normalize()),
            CameraKind::Orthographic => Ray::new(self.corner + offset, self.dir),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Camera {
    kind: CameraKind,
    data: CameraData,
}

impl Camera {
    pub fn new(kind: CameraKind) -> Self {
        Self {
            kind,
            data: Self::from_params(kind, &ParameterTable::new()),
        }
    }

    pub fn data(&self) -> CameraData {
        self.data
    }

    fn from_params(kind: CameraKind, params: &ParameterTable) -> CameraData {
        let pos = params.get_or("position", Vec3::ZERO);
        let dir = params.get_or("direction", Vec3::NEG_Z);
        let up = params.get_or("up", Vec3::Y);
        let aspect = params.get_or("aspect", 1.0f32);
        match kind {
            CameraKind::Perspective => {
                let fovy = params.get_or("fovy", 60f32.to_radians());
                CameraData::perspective(pos, dir, up, fovy, aspect)
            }
            CameraKind::Orthographic => {
                let height = params.get_or("height", 1.0f32);
                CameraData::orthographic(pos, dir, up, height, aspect)
            }
        }
    }
}

impl ObjectImpl for Camera {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        if params.get::<Vec3>("direction").is_some_and(|d| d.length_squared() == 0.0) {
            ctx.warn("camera 'direction' must not be zero");
        }
        self.data = Self::from_params(self.kind, params);
    }

    fn is_valid(&self) -> bool {
        self.data.dir != Vec3::ZERO && self.data.du != Vec3::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_perspective_center_ray() {
        let cam = CameraData::perspective(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, Vec3::Y, 1.0, 1.0);
        let ray = cam.ray(Vec2::splat(0.5));
        assert_eq!(ray.org, Vec3::new(0.0, 0.0, 5.0));
        assert!(close(ray.dir, Vec3::NEG_Z));

        // Upper-right corner leans toward +x, +y
        let corner = cam.ray(Vec2::ONE);
        assert!(corner.dir.x > 0.0 && corner.dir.y > 0.0);
        assert!((corner.dir.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_orthographic_parallel_rays() {
        let cam = CameraData::orthographic(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 2.0, 2.0);
        let a = cam.ray(Vec2::ZERO);
        let b = cam.ray(Vec2::ONE);
        assert_eq!(a.dir, b.dir);
        assert!(close(a.org, Vec3::new(-2.0, -1.0, 0.0)));
        assert!(close(b.org, Vec3::new(2.0, 1.0, 0.0)));
    }

    #[test]
    fn test_defaults_valid() {
        let cam = Camera::new(CameraKind::Perspective);
        assert!(cam.is_valid());
        assert_eq!(cam.data().ray(Vec2::splat(0.5)).org, Vec3::ZERO);
    }
}
