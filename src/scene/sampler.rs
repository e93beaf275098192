//! Samplers: material inputs computed per hit.
//!
//! Subtypes:
//! - `image1D` / `image2D` / `image3D` - filtered lookup into an `image`
//!   array addressed by a geometry attribute (`inAttribute`)
//! - `primitive` - one value of `array` per primitive, shifted by `inOffset`
//! - `transform` - the input attribute passed through `outTransform`
//!
//! Image samplers transform the input by `inTransform` + `inOffset` and
//! every sampler transforms its output by `outTransform` + `outOffset`.

use std::sync::Arc;

use super::{observe_typed, Attribute};
use crate::array::DEFAULT_ATTRIBUTE_VALUE;
use crate::core::{ObjectContext, ObjectImpl, ObserverRef, ParameterTable};
use crate::util::{interpolant, DataType, Mat4, Vec4, WrapMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SamplerKind {
    Image1D,
    Image2D,
    Image3D,
    Primitive,
    Transform,
}

impl SamplerKind {
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "image1D" => Some(Self::Image1D),
            "image2D" => Some(Self::Image2D),
            "image3D" => Some(Self::Image3D),
            "primitive" => Some(Self::Primitive),
            "transform" => Some(Self::Transform),
            _ => None,
        }
    }

    /// Array parameter the sampler reads, if any.
    fn source_param(self) -> Option<(&'static str, DataType)> {
        match self {
            Self::Image1D => Some(("image", DataType::Array1D)),
            Self::Image2D => Some(("image", DataType::Array2D)),
            Self::Image3D => Some(("image", DataType::Array3D)),
            Self::Primitive => Some(("array", DataType::Array1D)),
            Self::Transform => None,
        }
    }

    fn rank(self) -> usize {
        match self {
            Self::Image1D => 1,
            Self::Image2D => 2,
            Self::Image3D => 3,
            Self::Primitive | Self::Transform => 0,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Image1D => "image1D",
            Self::Image2D => "image2D",
            Self::Image3D => "image3D",
            Self::Primitive => "primitive",
            Self::Transform => "transform",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Source {
    /// Texels x fastest; unused trailing dims are 1
    Image {
        texels: Vec<Vec4>,
        dims: [usize; 3],
        rank: usize,
        wrap: [WrapMode; 3],
        linear: bool,
    },
    Primitive {
        values: Vec<Vec4>,
        offset: usize,
    },
    Transform,
}

/// Immutable sampler state captured at finalize.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SamplerData {
    in_attribute: Option<Attribute>,
    in_transform: Mat4,
    in_offset: Vec4,
    out_transform: Mat4,
    out_offset: Vec4,
    source: Source,
}

impl SamplerData {
    /// Sample for the hit whose attributes `attribute` resolves and whose
    /// input primitive is `primitive`.
    pub fn sample(&self, attribute: impl Fn(Attribute) -> Vec4, primitive: u32) -> Vec4 {
        let value = match &self.source {
            Source::Primitive { values, offset } => (primitive as usize)
                .checked_add(*offset)
                .and_then(|i| values.get(i).copied())
                .unwrap_or(DEFAULT_ATTRIBUTE_VALUE),
            Source::Transform => match self.in_attribute {
                Some(attr) => attribute(attr),
                None => return DEFAULT_ATTRIBUTE_VALUE,
            },
            Source::Image {
                texels,
                dims,
                rank,
                wrap,
                linear,
            } => {
                let Some(attr) = self.in_attribute else {
                    return DEFAULT_ATTRIBUTE_VALUE;
                };
                let coord = self.in_transform * attribute(attr) + self.in_offset;
                sample_image(texels, *dims, *rank, *wrap, *linear, coord)
            }
        };
        self.out_transform * value + self.out_offset
    }
}

fn sample_image(texels: &[Vec4], dims: [usize; 3], rank: usize, wrap: [WrapMode; 3], linear: bool, coord: Vec4) -> Vec4 {
    // (lower, upper, frac) per axis; axes past the rank stay on texel 0
    let mut axes = [(0usize, 0usize, 0.0f32); 3];
    for axis in 0..rank {
        let i = interpolant(coord[axis], dims[axis], true);
        axes[axis] = (
            wrap[axis].wrap(i.lower, dims[axis]),
            wrap[axis].wrap(i.upper, dims[axis]),
            i.frac,
        );
    }
    let texel = |x: usize, y: usize, z: usize| {
        texels
            .get(x + dims[0] * (y + dims[1] * z))
            .copied()
            .unwrap_or(DEFAULT_ATTRIBUTE_VALUE)
    };
    let blend = |a: Vec4, b: Vec4, f: f32| {
        if linear {
            a.lerp(b, f)
        } else if f < 0.5 {
            a
        } else {
            b
        }
    };

    let [(x0, x1, fx), (y0, y1, fy), (z0, z1, fz)] = axes;
    let plane = |z: usize| {
        blend(
            blend(texel(x0, y0, z), texel(x1, y0, z), fx),
            blend(texel(x0, y1, z), texel(x1, y1, z), fx),
            fy,
        )
    };
    blend(plane(z0), plane(z1), fz)
}

#[derive(Debug)]
pub(crate) struct Sampler {
    kind: SamplerKind,
    array: Option<ObserverRef>,
    in_attribute: Option<Attribute>,
    linear: bool,
    wrap: [WrapMode; 3],
    in_transform: Mat4,
    in_offset: Vec4,
    out_transform: Mat4,
    out_offset: Vec4,
    primitive_offset: usize,
    data: Option<Arc<SamplerData>>,
}

impl Sampler {
    pub fn new(kind: SamplerKind) -> Self {
        Self {
            kind,
            array: None,
            in_attribute: Some(Attribute::Attribute0),
            linear: true,
            wrap: [WrapMode::ClampToEdge; 3],
            in_transform: Mat4::IDENTITY,
            in_offset: Vec4::ZERO,
            out_transform: Mat4::IDENTITY,
            out_offset: Vec4::ZERO,
            primitive_offset: 0,
            data: None,
        }
    }

    pub fn data(&self) -> Option<Arc<SamplerData>> {
        self.data.clone()
    }

    fn build(&self) -> Option<SamplerData> {
        let source = match self.kind {
            SamplerKind::Transform => Source::Transform,
            SamplerKind::Primitive => {
                let body = self.array.as_ref()?.read();
                Source::Primitive {
                    values: body.as_array1d()?.attribute_values(),
                    offset: self.primitive_offset,
                }
            }
            SamplerKind::Image1D | SamplerKind::Image2D | SamplerKind::Image3D => {
                let body = self.array.as_ref()?.read();
                let (texels, dims) = if let Some(a) = body.as_array1d() {
                    (a.attribute_values(), [a.size(), 1, 1])
                } else if let Some(a) = body.as_array2d() {
                    let [w, h] = a.dims();
                    (a.attribute_values(), [w, h, 1])
                } else {
                    let a = body.as_array3d()?;
                    let d = a.dims();
                    (a.attribute_values(), [d.x as usize, d.y as usize, d.z as usize])
                };
                Source::Image {
                    texels,
                    dims,
                    rank: self.kind.rank(),
                    wrap: self.wrap,
                    linear: self.linear,
                }
            }
        };
        Some(SamplerData {
            in_attribute: self.in_attribute,
            in_transform: self.in_transform,
            in_offset: self.in_offset,
            out_transform: self.out_transform,
            out_offset: self.out_offset,
            source,
        })
    }
}

fn wrap_mode(params: &ParameterTable, name: &str) -> WrapMode {
    WrapMode::from_name(&params.get_string_or(name, "clampToEdge"))
}

impl ObjectImpl for Sampler {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        self.array = match self.kind.source_param() {
            Some((name, kind)) => {
                let array = observe_typed(params, name, kind, ctx);
                if array.is_none() {
                    ctx.warn(format!(
                        "missing required parameter '{name}' on {} sampler",
                        self.kind.name()
                    ));
                }
                array
            }
            None => None,
        };

        let attr_name = params.get_string_or("inAttribute", "attribute0");
        self.in_attribute = match attr_name.as_str() {
            "none" => None,
            name => {
                let attr = Attribute::from_name(name);
                if attr.is_none() {
                    ctx.warn(format!("unknown sampler input attribute '{name}'"));
                }
                attr
            }
        };
        self.linear = params.get_string_or("filter", "linear") != "nearest";
        self.wrap = if self.kind == SamplerKind::Image1D && params.contains("wrapMode") {
            [wrap_mode(params, "wrapMode"), WrapMode::ClampToEdge, WrapMode::ClampToEdge]
        } else {
            [
                wrap_mode(params, "wrapMode1"),
                wrap_mode(params, "wrapMode2"),
                wrap_mode(params, "wrapMode3"),
            ]
        };
        self.in_transform = params.get_or("inTransform", Mat4::IDENTITY);
        self.out_transform = params.get_or("outTransform", Mat4::IDENTITY);
        self.out_offset = params.get_or("outOffset", Vec4::ZERO);
        if self.kind == SamplerKind::Primitive {
            self.in_offset = Vec4::ZERO;
            self.primitive_offset = params
                .get::<u64>("inOffset")
                .or_else(|| params.get::<u32>("inOffset").map(u64::from))
                .map_or(0, |o| o as usize);
        } else {
            self.in_offset = params.get_or("inOffset", Vec4::ZERO);
            self.primitive_offset = 0;
        }
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        let data = self.build().map(Arc::new);
        let changed = data != self.data;
        self.data = data;
        if changed {
            ctx.notify_observers();
        }
    }

    fn is_valid(&self) -> bool {
        self.data.is_some()
    }
}

#[cfg(test)]
impl SamplerData {
    pub fn image2d_for_tests(texels: Vec<Vec4>, width: usize, height: usize, linear: bool) -> Self {
        Self {
            in_attribute: Some(Attribute::Attribute0),
            in_transform: Mat4::IDENTITY,
            in_offset: Vec4::ZERO,
            out_transform: Mat4::IDENTITY,
            out_offset: Vec4::ZERO,
            source: Source::Image {
                texels,
                dims: [width, height, 1],
                rank: 2,
                wrap: [WrapMode::ClampToEdge; 3],
                linear,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::{Array1D, Array2D, ArrayDescriptor};
    use crate::core::{AnyValue, DeviceConfig, DeviceState, ObjectRef};
    use crate::device::ObjectBody;
    use crate::util::Vec3;

    fn finalize(state: &Arc<DeviceState>, sampler: &mut Sampler, params: &ParameterTable) {
        let rec = state.create_object(DataType::Sampler, "", ObjectBody::Unknown);
        let ctx = ObjectContext::new(state, &rec);
        sampler.commit_parameters(params, &ctx);
        sampler.finalize(&ctx);
    }

    fn array1d(state: &DeviceState, values: &[Vec4]) -> ObjectRef {
        let mut a = Array1D::new(ArrayDescriptor::new_1d(DataType::Float32Vec4, values.len())).expect("array");
        a.core_mut().bytes_mut().copy_from_slice(bytemuck::cast_slice(values));
        state.create_internal(DataType::Array1D, "", ObjectBody::Array1D(a))
    }

    fn checker(state: &DeviceState) -> ObjectRef {
        let texels = [Vec4::X, Vec4::Y, Vec4::Z, Vec4::W];
        let mut a = Array2D::new(ArrayDescriptor::new_2d(DataType::Float32Vec4, 2, 2)).expect("image");
        a.core_mut().bytes_mut().copy_from_slice(bytemuck::cast_slice(&texels));
        state.create_internal(DataType::Array2D, "", ObjectBody::Array2D(a))
    }

    fn uv(u: f32, v: f32) -> impl Fn(Attribute) -> Vec4 {
        move |attr| match attr {
            Attribute::Attribute0 => Vec4::new(u, v, 0.0, 1.0),
            _ => DEFAULT_ATTRIBUTE_VALUE,
        }
    }

    #[test]
    fn test_image2d_nearest_and_linear() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut params = ParameterTable::new();
        params.set_direct("image", AnyValue::from_object(DataType::Array2D, checker(&state)));
        params.set("filter", AnyValue::from("nearest"));

        let mut s = Sampler::new(SamplerKind::Image2D);
        finalize(&state, &mut s, &params);
        let d = s.data().expect("valid sampler");
        assert_eq!(d.sample(uv(0.25, 0.25), 0), Vec4::X);
        assert_eq!(d.sample(uv(0.75, 0.25), 0), Vec4::Y);
        assert_eq!(d.sample(uv(0.25, 0.75), 0), Vec4::Z);
        // Clamped outside the image
        assert_eq!(d.sample(uv(2.0, 2.0), 0), Vec4::W);

        params.set("filter", AnyValue::from("linear"));
        finalize(&state, &mut s, &params);
        let d = s.data().expect("valid sampler");
        let c = d.sample(uv(0.5, 0.25), 0);
        assert!((c - Vec4::new(0.5, 0.5, 0.0, 0.0)).abs().max_element() < 1e-6);
    }

    #[test]
    fn test_repeat_wrap_and_transforms() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut params = ParameterTable::new();
        params.set_direct("image", AnyValue::from_object(DataType::Array2D, checker(&state)));
        params.set("filter", AnyValue::from("nearest"));
        params.set("wrapMode1", AnyValue::from("repeat"));
        params.set("outTransform", AnyValue::new(Mat4::from_scale(Vec3::splat(2.0))));
        params.set("outOffset", AnyValue::new(Vec4::new(0.0, 0.0, 0.0, -1.0)));

        let mut s = Sampler::new(SamplerKind::Image2D);
        finalize(&state, &mut s, &params);
        let d = s.data().expect("valid sampler");
        // u = 1.25 wraps to the first column
        assert_eq!(d.sample(uv(1.25, 0.25), 0), Vec4::new(2.0, 0.0, 0.0, -1.0));
    }

    #[test]
    fn test_primitive_sampler_offset() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut params = ParameterTable::new();
        params.set_direct(
            "array",
            AnyValue::from_object(DataType::Array1D, array1d(&state, &[Vec4::X, Vec4::Y, Vec4::Z])),
        );
        params.set("inOffset", AnyValue::new(1u32));

        let mut s = Sampler::new(SamplerKind::Primitive);
        finalize(&state, &mut s, &params);
        let d = s.data().expect("valid sampler");
        assert_eq!(d.sample(uv(0.0, 0.0), 0), Vec4::Y);
        assert_eq!(d.sample(uv(0.0, 0.0), 1), Vec4::Z);
        assert_eq!(d.sample(uv(0.0, 0.0), 2), DEFAULT_ATTRIBUTE_VALUE);
    }

    #[test]
    fn test_transform_sampler_and_missing_image() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let mut params = ParameterTable::new();
        params.set("outTransform", AnyValue::new(Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0))));
        let mut s = Sampler::new(SamplerKind::Transform);
        finalize(&state, &mut s, &params);
        let d = s.data().expect("transform needs no array");
        assert_eq!(d.sample(uv(0.5, 0.5), 0), Vec4::new(1.5, 0.5, 0.0, 1.0));

        let mut image = Sampler::new(SamplerKind::Image1D);
        finalize(&state, &mut image, &ParameterTable::new());
        assert!(!image.is_valid());
        assert_eq!(SamplerKind::from_subtype("volume"), None);
    }
}
