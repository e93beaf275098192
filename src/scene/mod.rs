//! Scene objects: geometry, materials, samplers, surfaces, volumes and
//! the group / instance / world graph.
//!
//! Every object copies its parameters into typed fields on commit and
//! derives an immutable, `Arc`-shared snapshot on finalize. Groups and
//! worlds assemble those snapshots into acceleration structures lazily,
//! driven by the device-wide update requests (see [`World`]).

mod camera;
mod field;
mod geometry;
mod group;
mod instance;
mod material;
mod sampler;
mod surface;
mod volume;
mod world;

pub(crate) use camera::{Camera, CameraData, CameraKind};
pub(crate) use field::{FieldData, FieldKind, SpatialField};
pub(crate) use geometry::{Geometry, GeometryData, GeometryKind};
pub(crate) use group::{Group, GroupScene};
pub(crate) use instance::{Instance, InstanceData};
pub(crate) use material::{Material, MaterialData, MaterialKind};
pub(crate) use sampler::{Sampler, SamplerData, SamplerKind};
pub(crate) use surface::{Surface, SurfaceData, UniformAttributes};
pub(crate) use volume::{Volume, VolumeData, VolumeKind};
pub use world::RebuildStats;
pub(crate) use world::{VolumeHit, World, WorldScene};

use crate::core::{ObjectContext, ObserverRef, ParameterTable};
use crate::util::{DataType, Vec3, Vec4};

/// Per-vertex / per-primitive attribute slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attribute {
    Attribute0,
    Attribute1,
    Attribute2,
    Attribute3,
    Color,
}

impl Attribute {
    pub const ALL: [Attribute; 5] = [
        Self::Attribute0,
        Self::Attribute1,
        Self::Attribute2,
        Self::Attribute3,
        Self::Color,
    ];

    /// Attribute named by a material or renderer string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "attribute0" => Some(Self::Attribute0),
            "attribute1" => Some(Self::Attribute1),
            "attribute2" => Some(Self::Attribute2),
            "attribute3" => Some(Self::Attribute3),
            "color" => Some(Self::Color),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Attribute0 => "attribute0",
            Self::Attribute1 => "attribute1",
            Self::Attribute2 => "attribute2",
            Self::Attribute3 => "attribute3",
            Self::Color => "color",
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Observe an object parameter of `kind` on behalf of the current object.
pub(crate) fn observe_typed(
    params: &ParameterTable,
    name: &str,
    kind: DataType,
    ctx: &ObjectContext<'_>,
) -> Option<ObserverRef> {
    params.get_object(name, kind).map(|object| ctx.observe(object))
}

/// Observe a 1D array parameter.
pub(crate) fn observe_array(params: &ParameterTable, name: &str, ctx: &ObjectContext<'_>) -> Option<ObserverRef> {
    observe_typed(params, name, DataType::Array1D, ctx)
}

/// Uniform vec4 parameter; vec3 and float values widen with w = 1.
pub(crate) fn uniform_vec4(params: &ParameterTable, name: &str) -> Option<Vec4> {
    params
        .get::<Vec4>(name)
        .or_else(|| params.get::<Vec3>(name).map(|v| v.extend(1.0)))
        .or_else(|| params.get::<f32>(name).map(|v| Vec4::new(v, 0.0, 0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AnyValue;

    #[test]
    fn test_attribute_names() {
        for a in Attribute::ALL {
            assert_eq!(Attribute::from_name(a.name()), Some(a));
        }
        assert_eq!(Attribute::from_name("normal"), None);
        assert_eq!(Attribute::Color.index(), 4);
    }

    #[test]
    fn test_uniform_vec4_widening() {
        let mut p = ParameterTable::new();
        p.set("color", AnyValue::new(Vec3::new(0.1, 0.2, 0.3)));
        assert_eq!(uniform_vec4(&p, "color"), Some(Vec4::new(0.1, 0.2, 0.3, 1.0)));
        p.set("attribute0", AnyValue::new(0.5f32));
        assert_eq!(uniform_vec4(&p, "attribute0"), Some(Vec4::new(0.5, 0.0, 0.0, 1.0)));
        assert_eq!(uniform_vec4(&p, "attribute1"), None);
    }
}
