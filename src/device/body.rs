//! Kind-specific state stored behind every object record.

use std::ptr::NonNull;

use crate::array::{Array1D, Array2D, Array3D, ArrayCore, ObjectArray};
use crate::core::{AnyValue, ObjectContext, ObjectImpl, ParameterTable, WaitMode};
use crate::render::{Frame, Renderer};
use crate::scene::{Camera, Geometry, Group, Instance, Material, Sampler, SpatialField, Surface, Volume, World};
use crate::util::DataType;

/// Closed set of object bodies, one variant per implemented kind.
pub(crate) enum ObjectBody {
    /// Created with a subtype this device does not implement
    Unknown,
    /// Left behind after destruction or teardown
    Destroyed,
    Array1D(Array1D),
    Array2D(Array2D),
    Array3D(Array3D),
    ObjectArray(ObjectArray),
    Geometry(Geometry),
    Material(Material),
    Sampler(Sampler),
    Surface(Surface),
    SpatialField(SpatialField),
    Volume(Volume),
    Group(Group),
    Instance(Instance),
    World(World),
    Camera(Camera),
    Renderer(Renderer),
    Frame(Frame),
}

macro_rules! accessors {
    ($($variant:ident => $get:ident, $get_mut:ident;)*) => {
        impl ObjectBody {
            $(
                #[allow(dead_code)]
                pub fn $get(&self) -> Option<&$variant> {
                    match self {
                        Self::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                #[allow(dead_code)]
                pub fn $get_mut(&mut self) -> Option<&mut $variant> {
                    match self {
                        Self::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            )*
        }
    };
}

accessors! {
    Array1D => as_array1d, as_array1d_mut;
    Array2D => as_array2d, as_array2d_mut;
    Array3D => as_array3d, as_array3d_mut;
    ObjectArray => as_object_array, as_object_array_mut;
    Geometry => as_geometry, as_geometry_mut;
    Material => as_material, as_material_mut;
    Sampler => as_sampler, as_sampler_mut;
    Surface => as_surface, as_surface_mut;
    SpatialField => as_spatial_field, as_spatial_field_mut;
    Volume => as_volume, as_volume_mut;
    Group => as_group, as_group_mut;
    Instance => as_instance, as_instance_mut;
    World => as_world, as_world_mut;
    Camera => as_camera, as_camera_mut;
    Renderer => as_renderer, as_renderer_mut;
    Frame => as_frame, as_frame_mut;
}

/// Run `$e` against whichever body is present, or `$fallback` for the
/// inert variants.
macro_rules! dispatch {
    ($self:expr, $b:ident => $e:expr, $fallback:expr) => {
        match $self {
            ObjectBody::Array1D($b) => $e,
            ObjectBody::Array2D($b) => $e,
            ObjectBody::Array3D($b) => $e,
            ObjectBody::ObjectArray($b) => $e,
            ObjectBody::Geometry($b) => $e,
            ObjectBody::Material($b) => $e,
            ObjectBody::Sampler($b) => $e,
            ObjectBody::Surface($b) => $e,
            ObjectBody::SpatialField($b) => $e,
            ObjectBody::Volume($b) => $e,
            ObjectBody::Group($b) => $e,
            ObjectBody::Instance($b) => $e,
            ObjectBody::World($b) => $e,
            ObjectBody::Camera($b) => $e,
            ObjectBody::Renderer($b) => $e,
            ObjectBody::Frame($b) => $e,
            ObjectBody::Unknown | ObjectBody::Destroyed => $fallback,
        }
    };
}

impl ObjectBody {
    pub fn is_array(&self) -> bool {
        self.array_core().is_some()
    }

    pub fn array_core(&self) -> Option<&ArrayCore> {
        match self {
            Self::Array1D(a) => Some(a.core()),
            Self::Array2D(a) => Some(a.core()),
            Self::Array3D(a) => Some(a.core()),
            Self::ObjectArray(a) => Some(a.core()),
            _ => None,
        }
    }

    pub fn array_core_mut(&mut self) -> Option<&mut ArrayCore> {
        match self {
            Self::Array1D(a) => Some(a.core_mut()),
            Self::Array2D(a) => Some(a.core_mut()),
            Self::Array3D(a) => Some(a.core_mut()),
            Self::ObjectArray(a) => Some(a.core_mut()),
            _ => None,
        }
    }

    pub fn map_array(&mut self, ctx: &ObjectContext<'_>) -> Option<NonNull<u8>> {
        match self {
            Self::Array1D(a) => Some(a.map(ctx)),
            Self::Array2D(a) => Some(a.map(ctx)),
            Self::Array3D(a) => Some(a.map(ctx)),
            Self::ObjectArray(a) => Some(a.map(ctx)),
            _ => None,
        }
    }

    /// Returns false for non-array bodies.
    pub fn unmap_array(&mut self, ctx: &ObjectContext<'_>) -> bool {
        match self {
            Self::Array1D(a) => a.unmap(ctx),
            Self::Array2D(a) => a.unmap(ctx),
            Self::Array3D(a) => a.unmap(ctx),
            Self::ObjectArray(a) => a.unmap(ctx),
            _ => return false,
        }
        true
    }

    /// Contents changed behind the array's back: refresh derived state and
    /// tell dependents.
    pub fn array_contents_changed(&mut self, ctx: &ObjectContext<'_>) {
        if let Self::ObjectArray(a) = self {
            a.update_handles(ctx);
        }
        ctx.notify_observers();
    }
}

impl ObjectImpl for ObjectBody {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        dispatch!(self, b => b.commit_parameters(params, ctx), ())
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        dispatch!(self, b => b.finalize(ctx), ())
    }

    fn is_valid(&self) -> bool {
        dispatch!(self, b => b.is_valid(), false)
    }

    fn get_property(
        &mut self,
        name: &str,
        ty: DataType,
        wait: WaitMode,
        ctx: &ObjectContext<'_>,
    ) -> Option<AnyValue> {
        dispatch!(self, b => b.get_property(name, ty, wait, ctx), None)
    }

    fn on_no_public_references(&mut self, ctx: &ObjectContext<'_>) {
        dispatch!(self, b => b.on_no_public_references(ctx), ())
    }
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Destroyed => "Destroyed",
            Self::Array1D(_) => "Array1D",
            Self::Array2D(_) => "Array2D",
            Self::Array3D(_) => "Array3D",
            Self::ObjectArray(_) => "ObjectArray",
            Self::Geometry(_) => "Geometry",
            Self::Material(_) => "Material",
            Self::Sampler(_) => "Sampler",
            Self::Surface(_) => "Surface",
            Self::SpatialField(_) => "SpatialField",
            Self::Volume(_) => "Volume",
            Self::Group(_) => "Group",
            Self::Instance(_) => "Instance",
            Self::World(_) => "World",
            Self::Camera(_) => "Camera",
            Self::Renderer(_) => "Renderer",
            Self::Frame(_) => "Frame",
        };
        f.write_str(name)
    }
}
