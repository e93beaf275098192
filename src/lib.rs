//! # Prism
//!
//! Device-agnostic 3D scene description API with a CPU reference device.
//!
//! Applications build a scene out of reference-counted objects addressed by
//! opaque handles: arrays of data, geometry, materials, surfaces, volumes,
//! groups, instances and a world. Parameters are staged on an object and
//! take effect on commit; dependent objects are brought up to date lazily,
//! so a world rebuilds only the acceleration structures whose inputs
//! changed. A sample renderer shades frames tile-parallel in the background.
//!
//! ## Modules
//!
//! - [`util`] - Type registry, errors and math types
//! - [`core`] - Values, parameter tables, objects and the commit buffer
//! - [`array`] - 1D/2D/3D and object arrays over shared, captured or managed memory
//! - [`scene`] - Geometry, materials, surfaces, volumes, groups, instances, worlds
//! - [`render`] - Sample renderer and frames
//! - [`device`] - The handle-based public protocol
//!
//! ## Example
//!
//! ```ignore
//! use prism::{ArrayDescriptor, DataType, Device, DeviceConfig, Vec3, WaitMode, Box3};
//!
//! let device = Device::new(DeviceConfig::default())?;
//! let positions = device.new_array1d(ArrayDescriptor::new_1d(DataType::Float32Vec3, 3))?;
//! device.write_array(positions, 0, &[Vec3::ZERO, Vec3::X, Vec3::Y])?;
//!
//! let geometry = device.new_geometry("triangle")?;
//! device.set_parameter_object(geometry, "vertex.position", DataType::Array1D, Some(positions))?;
//! device.commit_parameters(geometry)?;
//!
//! let surface = device.new_surface()?;
//! device.set_parameter_object(surface, "geometry", DataType::Geometry, Some(geometry))?;
//! device.commit_parameters(surface)?;
//!
//! let world = device.new_world()?;
//! let surfaces = device.new_object_array(DataType::Surface, &[surface])?;
//! device.set_parameter_object(world, "surface", DataType::Array1D, Some(surfaces))?;
//! device.commit_parameters(world)?;
//!
//! let bounds: Option<Box3> = device.get_property(world, "bounds", WaitMode::Wait);
//! ```

pub mod util;
pub mod core;
pub mod array;
pub mod scene;
pub mod render;
pub mod device;

// Re-export commonly used types
pub use crate::array::{AppMemory, ArrayDescriptor, MemoryDeleter, Ownership};
pub use crate::core::{
    init_logging, CommitState, DeviceConfig, Handle, RefType, Severity, StatusCallback, StatusMessage, WaitMode,
};
pub use crate::device::Device;
pub use crate::render::{MappedChannel, RenderMode};
pub use crate::scene::{Attribute, RebuildStats};
pub use crate::util::{Bool, Box1, Box3, DataType, Error, Result, ValueType};
pub use crate::util::{Mat4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::array::{AppMemory, ArrayDescriptor};
    pub use crate::core::{DeviceConfig, Handle, WaitMode};
    pub use crate::device::Device;
    pub use crate::util::{Box3, DataType, Error, Result, Vec3, Vec4};
}
