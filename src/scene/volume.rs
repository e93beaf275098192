//! Volumes: a spatial field mapped to color and opacity by a 1D transfer
//! function, ray-marched front to back.

use std::sync::Arc;

use super::{observe_array, observe_typed, FieldData};
use crate::array::sample_linear;
use crate::core::{AnyValue, ObjectContext, ObjectImpl, ObserverRef, ParameterTable, WaitMode};
use crate::util::{accumulate, Box1, Box3, DataType, Vec3, Vec4};

/// Accumulated opacity at which marching stops.
const OPACITY_CUTOFF: f32 = 0.99;

/// Transfer function tables captured at finalize.
#[derive(Debug)]
struct TransferFunction {
    colors: Vec<Vec4>,
    opacities: Vec<Vec4>,
    value_range: Box1,
    density_scale: f32,
}

/// Render-time view of one volume.
#[derive(Debug)]
pub(crate) struct VolumeData {
    pub id: u32,
    field: Arc<FieldData>,
    tf: Arc<TransferFunction>,
}

impl VolumeData {
    pub fn bounds(&self) -> Box3 {
        self.field.bounds()
    }

    /// March `[t.lower, t.upper]` along `org + dir * t`, compositing under
    /// the running `color`/`opacity`. The field's step is scaled by
    /// `inv_sampling_rate`.
    pub fn render(&self, org: Vec3, dir: Vec3, t: Box1, inv_sampling_rate: f32, color: &mut Vec3, opacity: &mut f32) {
        let step = self.field.step_size() * inv_sampling_rate;
        if !step.is_finite() || step <= 0.0 {
            return;
        }
        let tf = &self.tf;
        let mut interval = t;
        interval.lower += step;

        while *opacity < OPACITY_CUTOFF && interval.size() >= 0.0 {
            let p = org + dir * interval.lower;
            let s = tf.value_range.normalize(self.field.sample(p));
            if !s.is_nan() {
                let c = sample_linear(&tf.colors, s).truncate();
                let o = sample_linear(&tf.opacities, s).x * tf.density_scale;
                accumulate(color, c * o, *opacity);
                accumulate(opacity, o, *opacity);
            }
            interval.lower += step;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VolumeKind {
    TransferFunction1D,
}

impl VolumeKind {
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "transferFunction1D" | "scivis" => Some(Self::TransferFunction1D),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Volume {
    field: Option<ObserverRef>,
    color: Option<ObserverRef>,
    opacity: Option<ObserverRef>,
    value_range: Box1,
    density_scale: f32,
    id: u32,
    tf: Option<Arc<TransferFunction>>,
}

impl Volume {
    pub fn new(_kind: VolumeKind) -> Self {
        Self {
            field: None,
            color: None,
            opacity: None,
            value_range: Box1::default(),
            density_scale: 1.0,
            id: u32::MAX,
            tf: None,
        }
    }

    /// Current field and transfer function; `None` if not renderable.
    pub fn snapshot(&self) -> Option<VolumeData> {
        let tf = self.tf.clone()?;
        let field = self.field.as_ref()?.read().as_spatial_field()?.data()?;
        Some(VolumeData {
            id: self.id,
            field,
            tf,
        })
    }

    fn read_table(array: &Option<ObserverRef>) -> Option<Vec<Vec4>> {
        let body = array.as_ref()?.read();
        let values = body.as_array1d().map(|a| a.attribute_values());
        values.filter(|v| !v.is_empty())
    }
}

impl ObjectImpl for Volume {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.field = observe_typed(params, "value", DataType::SpatialField, ctx)
            .or_else(|| observe_typed(params, "field", DataType::SpatialField, ctx));
        if self.field.is_none() {
            ctx.warn("no spatial field provided to transferFunction1D volume");
        }
        self.color = observe_array(params, "color", ctx);
        self.opacity = observe_array(params, "opacity", ctx);
        self.value_range = params.get_or("valueRange", Box1::new(0.0, 1.0));
        self.density_scale = params.get_or("densityScale", 1.0f32);
        self.id = params.get_or("id", u32::MAX);
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        self.tf = None;
        let Some(colors) = Self::read_table(&self.color) else {
            ctx.warn("no color data provided to transferFunction1D volume");
            return;
        };
        let Some(opacities) = Self::read_table(&self.opacity) else {
            ctx.warn("no opacity data provided to transferFunction1D volume");
            return;
        };
        self.tf = Some(Arc::new(TransferFunction {
            colors,
            opacities,
            value_range: self.value_range,
            density_scale: self.density_scale,
        }));
    }

    fn is_valid(&self) -> bool {
        self.tf.is_some() && self.field.as_ref().is_some_and(|f| f.is_valid())
    }

    fn get_property(
        &mut self,
        name: &str,
        ty: DataType,
        _wait: WaitMode,
        _ctx: &ObjectContext<'_>,
    ) -> Option<AnyValue> {
        match (name, ty) {
            ("bounds", DataType::Float32Box3) => {
                let field = self.field.as_ref()?.read().as_spatial_field()?.data()?;
                Some(AnyValue::new(field.bounds()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
impl VolumeData {
    pub fn for_tests(field: FieldData, colors: Vec<Vec4>, opacities: Vec<f32>, id: u32) -> Self {
        Self {
            id,
            field: Arc::new(field),
            tf: Arc::new(TransferFunction {
                colors,
                opacities: opacities.into_iter().map(|o| Vec4::new(o, 0.0, 0.0, 1.0)).collect(),
                value_range: Box1::new(0.0, 1.0),
                density_scale: 1.0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::UVec3;

    fn constant_volume(value: f32, opacity: f32) -> VolumeData {
        let field = FieldData::new(vec![value; 8], UVec3::splat(2), Vec3::ZERO, Vec3::ONE);
        VolumeData::for_tests(field, vec![Vec4::new(1.0, 0.0, 0.0, 1.0)], vec![opacity], 7)
    }

    #[test]
    fn test_marching_accumulates_under() {
        let v = constant_volume(0.5, 0.1);
        let mut color = Vec3::ZERO;
        let mut opacity = 0.0;
        v.render(Vec3::new(0.5, 0.5, -1.0), Vec3::Z, Box1::new(1.0, 2.0), 1.0, &mut color, &mut opacity);
        // step 0.5, first sample at 1.5, second at 2.0
        let expected = 0.1 + 0.9 * 0.1;
        assert!((opacity - expected).abs() < 1e-6);
        assert!((color.x - expected).abs() < 1e-6);
        assert_eq!(color.y, 0.0);
    }

    #[test]
    fn test_early_termination() {
        let v = constant_volume(0.5, 1.0);
        let mut color = Vec3::ZERO;
        let mut opacity = 0.0;
        v.render(Vec3::new(0.5, 0.5, -1.0), Vec3::Z, Box1::new(1.0, 2.0), 1.0, &mut color, &mut opacity);
        assert_eq!(opacity, 1.0);
        assert_eq!(color, Vec3::X);
    }

    #[test]
    fn test_outside_samples_skipped() {
        let v = constant_volume(0.5, 0.5);
        let mut color = Vec3::ZERO;
        let mut opacity = 0.0;
        v.render(Vec3::new(5.0, 5.0, -1.0), Vec3::Z, Box1::new(1.0, 2.0), 1.0, &mut color, &mut opacity);
        assert_eq!(opacity, 0.0);
        assert_eq!(v.bounds(), Box3::new(Vec3::ZERO, Vec3::ONE));
    }

    #[test]
    fn test_sampling_rate_shortens_step() {
        let v = constant_volume(0.5, 0.1);
        let mut color = Vec3::ZERO;
        let mut opacity = 0.0;
        v.render(Vec3::new(0.5, 0.5, -1.0), Vec3::Z, Box1::new(1.0, 2.0), 0.5, &mut color, &mut opacity);
        // step 0.25: samples at 1.25, 1.5, 1.75 and 2.0
        let expected = 1.0 - 0.9f32.powi(4);
        assert!((opacity - expected).abs() < 1e-5);
    }
}
