//! Surface materials: `matte` and `physicallyBased`.
//!
//! Both resolve to a base color and an opacity, each a constant, the name
//! of a geometry attribute or a sampler object, plus the alpha mode that
//! turns the combined alpha into coverage.

use std::sync::Arc;

use super::{observe_typed, Attribute, SamplerData};
use crate::core::{ObjectContext, ObjectImpl, ObserverRef, ParameterTable};
use crate::util::{DataType, Vec3, Vec4};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MaterialKind {
    Matte,
    PhysicallyBased,
}

impl MaterialKind {
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "matte" => Some(Self::Matte),
            "physicallyBased" => Some(Self::PhysicallyBased),
            _ => None,
        }
    }

    fn color_param(self) -> &'static str {
        match self {
            Self::Matte => "color",
            Self::PhysicallyBased => "baseColor",
        }
    }

    fn default_color(self) -> Vec4 {
        match self {
            Self::Matte => Vec3::splat(0.8).extend(1.0),
            Self::PhysicallyBased => Vec4::ONE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum AlphaMode {
    #[default]
    Opaque,
    Blend,
    Mask,
}

impl AlphaMode {
    pub fn from_name(name: &str) -> Self {
        match name {
            "blend" => Self::Blend,
            "mask" => Self::Mask,
            _ => Self::Opaque,
        }
    }
}

/// A constant, a per-hit attribute lookup or a sampler.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Input<T> {
    Constant(T),
    Attribute(Attribute),
    Sampler(Arc<SamplerData>),
}

/// Committed form of an input: samplers resolve at finalize.
#[derive(Debug)]
enum Source<T> {
    Input(Input<T>),
    Sampler(ObserverRef),
}

impl<T: Clone> Source<T> {
    fn resolve(&self, fallback: T, name: &str, ctx: &ObjectContext<'_>) -> Input<T> {
        match self {
            Self::Input(input) => input.clone(),
            Self::Sampler(sampler) => match sampler.read().as_sampler().and_then(|s| s.data()) {
                Some(data) => Input::Sampler(data),
                None => {
                    ctx.warn(format!("invalid sampler on material parameter '{name}', using default"));
                    Input::Constant(fallback)
                }
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MaterialData {
    pub color: Input<Vec4>,
    pub opacity: Input<f32>,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
}

impl MaterialData {
    /// Coverage for a combined alpha value.
    pub fn adjusted_alpha(&self, a: f32) -> f32 {
        match self.alpha_mode {
            AlphaMode::Opaque => 1.0,
            AlphaMode::Blend => a,
            AlphaMode::Mask => {
                if a >= self.alpha_cutoff {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct Material {
    kind: MaterialKind,
    color: Source<Vec4>,
    opacity: Source<f32>,
    alpha_mode: AlphaMode,
    alpha_cutoff: f32,
    data: Arc<MaterialData>,
}

impl Material {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            color: Source::Input(Input::Constant(kind.default_color())),
            opacity: Source::Input(Input::Constant(1.0)),
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            data: Arc::new(MaterialData {
                color: Input::Constant(kind.default_color()),
                opacity: Input::Constant(1.0),
                alpha_mode: AlphaMode::Opaque,
                alpha_cutoff: 0.5,
            }),
        }
    }

    pub fn data(&self) -> Arc<MaterialData> {
        Arc::clone(&self.data)
    }
}

fn sampler_input(params: &ParameterTable, name: &str, ctx: &ObjectContext<'_>) -> Option<ObserverRef> {
    observe_typed(params, name, DataType::Sampler, ctx)
}

fn attribute_input(params: &ParameterTable, name: &str, ctx: &ObjectContext<'_>) -> Option<Attribute> {
    let s = params.get_string(name)?;
    let attr = Attribute::from_name(s);
    if attr.is_none() {
        ctx.warn(format!("unknown attribute '{s}' for material parameter '{name}'"));
    }
    attr
}

impl ObjectImpl for Material {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        let color_param = self.kind.color_param();
        self.color = match sampler_input(params, color_param, ctx) {
            Some(sampler) => Source::Sampler(sampler),
            None => Source::Input(match attribute_input(params, color_param, ctx) {
                Some(attr) => Input::Attribute(attr),
                None => Input::Constant(
                    params
                        .get::<Vec4>(color_param)
                        .or_else(|| params.get::<Vec3>(color_param).map(|c| c.extend(1.0)))
                        .unwrap_or_else(|| self.kind.default_color()),
                ),
            }),
        };
        self.opacity = match sampler_input(params, "opacity", ctx) {
            Some(sampler) => Source::Sampler(sampler),
            None => Source::Input(match attribute_input(params, "opacity", ctx) {
                Some(attr) => Input::Attribute(attr),
                None => Input::Constant(params.get_or("opacity", 1.0f32)),
            }),
        };
        self.alpha_mode = AlphaMode::from_name(&params.get_string_or("alphaMode", "opaque"));
        self.alpha_cutoff = params.get_or("alphaCutoff", 0.5f32);
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        let color_param = self.kind.color_param();
        let data = MaterialData {
            color: self.color.resolve(self.kind.default_color(), color_param, ctx),
            opacity: self.opacity.resolve(1.0, "opacity", ctx),
            alpha_mode: self.alpha_mode,
            alpha_cutoff: self.alpha_cutoff,
        };
        if data != *self.data {
            self.data = Arc::new(data);
            ctx.notify_observers();
        }
    }
}
