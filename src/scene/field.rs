//! Spatial fields: scalar functions over 3D space sampled by volumes.
//!
//! Only `structuredRegular` exists: a float32 Array3D of voxel values on a
//! regular grid placed by `origin` and `spacing`.

use std::sync::Arc;

use super::observe_typed;
use crate::core::{AnyValue, ObjectContext, ObjectImpl, ObserverRef, ParameterTable, WaitMode};
use crate::util::{Box3, DataType, UVec3, Vec3};

/// Immutable voxel grid used during rendering.
#[derive(Debug)]
pub(crate) struct FieldData {
    voxels: Vec<f32>,
    dims: UVec3,
    origin: Vec3,
    spacing: Vec3,
    coord_upper: Vec3,
}

impl FieldData {
    pub fn new(voxels: Vec<f32>, dims: UVec3, origin: Vec3, spacing: Vec3) -> Self {
        let last = (dims.as_vec3() - 1.0).max(Vec3::ZERO);
        let coord_upper = Vec3::new(
            next_down(last.x),
            next_down(last.y),
            next_down(last.z),
        );
        Self {
            voxels,
            dims,
            origin,
            spacing,
            coord_upper,
        }
    }

    /// Ray-march step for this grid.
    pub fn step_size(&self) -> f32 {
        (self.spacing / 2.0).min_element()
    }

    pub fn bounds(&self) -> Box3 {
        Box3::new(
            self.origin,
            self.origin + (self.dims.as_vec3() - 1.0) * self.spacing,
        )
    }

    fn voxel(&self, i: UVec3) -> f32 {
        let idx = i.x as usize + self.dims.x as usize * (i.y as usize + self.dims.y as usize * i.z as usize);
        self.voxels.get(idx).copied().unwrap_or(f32::NAN)
    }

    /// Trilinear sample at an object-space point; NaN outside the grid.
    pub fn sample(&self, p: Vec3) -> f32 {
        let local = (p - self.origin) / self.spacing;
        let last = self.dims.as_vec3() - 1.0;
        if local.cmplt(Vec3::ZERO).any() || local.cmpgt(last).any() {
            return f32::NAN;
        }

        let c = local.clamp(Vec3::ZERO, self.coord_upper);
        let i0 = c.as_uvec3();
        let i1 = (i0 + 1).min(self.dims.saturating_sub(UVec3::ONE));
        let f = c - i0.as_vec3();

        let v = |x: u32, y: u32, z: u32| self.voxel(UVec3::new(x, y, z));
        let v00 = lerp(v(i0.x, i0.y, i0.z), v(i1.x, i0.y, i0.z), f.x);
        let v01 = lerp(v(i0.x, i1.y, i0.z), v(i1.x, i1.y, i0.z), f.x);
        let v10 = lerp(v(i0.x, i0.y, i1.z), v(i1.x, i0.y, i1.z), f.x);
        let v11 = lerp(v(i0.x, i1.y, i1.z), v(i1.x, i1.y, i1.z), f.x);
        lerp(lerp(v00, v01, f.y), lerp(v10, v11, f.y), f.z)
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

/// Largest float below `v` (for `v > 0`), keeping the upper voxel
/// index in range.
fn next_down(v: f32) -> f32 {
    if v <= 0.0 {
        0.0
    } else {
        f32::from_bits(v.to_bits() - 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FieldKind {
    StructuredRegular,
}

impl FieldKind {
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "structuredRegular" => Some(Self::StructuredRegular),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct SpatialField {
    data_array: Option<ObserverRef>,
    origin: Vec3,
    spacing: Vec3,
    data: Option<Arc<FieldData>>,
}

impl SpatialField {
    pub fn new(_kind: FieldKind) -> Self {
        Self {
            data_array: None,
            origin: Vec3::ZERO,
            spacing: Vec3::ONE,
            data: None,
        }
    }

    pub fn data(&self) -> Option<Arc<FieldData>> {
        self.data.clone()
    }
}

impl ObjectImpl for SpatialField {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.data_array = observe_typed(params, "data", DataType::Array3D, ctx);
        if self.data_array.is_none() {
            ctx.warn("missing required parameter 'data' on 'structuredRegular' field");
        }
        self.origin = params.get_or("origin", Vec3::ZERO);
        self.spacing = params.get_or("spacing", Vec3::ONE);
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        self.data = None;
        let Some(array) = &self.data_array else {
            return;
        };
        let body = array.read();
        let Some(grid) = body.as_array3d() else {
            return;
        };
        let Some(voxels) = grid.values::<f32>() else {
            ctx.warn("only float32 is implemented for structuredRegular spatial fields");
            return;
        };
        if self.spacing.cmple(Vec3::ZERO).any() {
            ctx.warn("'spacing' on structuredRegular field must be positive");
            return;
        }
        self.data = Some(Arc::new(FieldData::new(
            voxels.into_owned(),
            grid.dims(),
            self.origin,
            self.spacing,
        )));
    }

    fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    fn get_property(
        &mut self,
        name: &str,
        ty: DataType,
        _wait: WaitMode,
        _ctx: &ObjectContext<'_>,
    ) -> Option<AnyValue> {
        match (name, ty) {
            ("bounds", DataType::Float32Box3) => self.data.as_ref().map(|d| AnyValue::new(d.bounds())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> FieldData {
        // 2 x 2 x 2 grid, value = x index
        let voxels = vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        FieldData::new(voxels, UVec3::splat(2), Vec3::ZERO, Vec3::splat(2.0))
    }

    #[test]
    fn test_trilinear() {
        let f = ramp();
        assert_eq!(f.sample(Vec3::ZERO), 0.0);
        assert!((f.sample(Vec3::new(1.0, 0.5, 1.5)) - 0.5).abs() < 1e-6);
        assert!((f.sample(Vec3::splat(2.0)) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_outside_is_nan() {
        let f = ramp();
        assert!(f.sample(Vec3::new(-0.1, 0.0, 0.0)).is_nan());
        assert!(f.sample(Vec3::new(0.0, 2.1, 0.0)).is_nan());
    }

    #[test]
    fn test_bounds_and_step() {
        let f = FieldData::new(vec![0.0; 24], UVec3::new(2, 3, 4), Vec3::ONE, Vec3::new(1.0, 0.5, 2.0));
        assert_eq!(f.bounds(), Box3::new(Vec3::ONE, Vec3::new(2.0, 2.0, 7.0)));
        assert_eq!(f.step_size(), 0.25);
    }
}
