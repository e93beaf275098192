//! The public object protocol.
//!
//! A [`Device`] hands out opaque [`Handle`]s and routes every operation on
//! them to the object's record: parameter edits, commits, reference
//! counting, property queries, array mapping and frame rendering.
//!
//! # Example
//!
//! ```ignore
//! use prism::{Device, DeviceConfig, DataType, WaitMode, Box3};
//!
//! let device = Device::new(DeviceConfig::default())?;
//! let world = device.new_world()?;
//! device.commit_parameters(world)?;
//! let bounds: Option<Box3> = device.get_property(world, "bounds", WaitMode::Wait);
//! device.release(world)?;
//! ```

mod body;

pub(crate) use body::ObjectBody;

use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::array::{Array1D, Array2D, Array3D, ArrayDescriptor, ObjectArray};
use crate::core::{
    AnyValue, CommitState, DeviceConfig, DeviceState, Handle, ObjectContext, ObjectImpl, ObjectRecord, ObjectRef,
    RefType, Severity, StatusCallback, WaitMode,
};
use crate::render::{Frame, MappedChannel, Renderer};
use crate::scene::{
    Camera, CameraKind, FieldKind, Geometry, GeometryKind, Group, Instance, Material, MaterialKind, Sampler,
    SamplerKind, SpatialField, Surface, Volume, VolumeKind, World,
};
use crate::util::{Bool, DataType, Error, Result, ValueType, HANDLE_SIZE};

/// Owner of the device state; the last clone to go reports leaks.
struct DeviceInner {
    state: Arc<DeviceState>,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.state.flush_commits();
        self.state.teardown();
    }
}

/// Entry point of the library. Cheap to clone; clones share one device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let state = DeviceState::new(config)?;
        tracing::debug!(threads = state.pool.current_num_threads(), "device created");
        Ok(Self {
            inner: Arc::new(DeviceInner { state }),
        })
    }

    fn state(&self) -> &DeviceState {
        &self.inner.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.state().config
    }

    pub fn set_status_callback(&self, callback: Option<StatusCallback>) {
        self.state().set_status_callback(callback);
    }

    /// Live objects per kind, internal objects included.
    pub fn object_counts(&self) -> BTreeMap<DataType, usize> {
        self.state().object_counts()
    }

    fn lookup(&self, handle: Handle) -> Result<Arc<ObjectRecord>> {
        self.state().lookup(handle)
    }

    fn lookup_kind(&self, handle: Handle, kind: DataType) -> Result<Arc<ObjectRecord>> {
        let record = self.lookup(handle)?;
        if record.kind() != kind {
            return Err(Error::WrongObjectKind {
                expected: kind,
                actual: record.kind(),
            });
        }
        Ok(record)
    }

    // === Creation ===

    /// Create an object of `kind`. Subtypes this device does not implement
    /// yield an inert object that never becomes valid.
    pub fn new_object(&self, kind: DataType, subtype: &str) -> Result<Handle> {
        if kind == DataType::World {
            return self.new_world();
        }
        if !kind.is_object() || kind.is_array() || kind == DataType::Object {
            return Err(Error::InvalidArgument(format!("cannot create an object of type {kind}")));
        }
        let body = make_body(kind, subtype);
        let inert = body.is_none();
        let record = self.state().create_object(kind, subtype, body.unwrap_or(ObjectBody::Unknown));
        if inert {
            let e = Error::UnknownSubtype {
                kind,
                subtype: subtype.to_owned(),
            };
            self.state().report(Severity::Warning, Some(record.handle()), kind, e.to_string());
        }
        Ok(self.created(&record))
    }

    /// Fresh objects start uncommitted so their first commit always runs.
    fn created(&self, record: &Arc<ObjectRecord>) -> Handle {
        record.mark_parameter_changed();
        tracing::trace!(handle = %record.handle(), kind = %record.kind(), "object created");
        record.handle()
    }

    pub fn new_geometry(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Geometry, subtype)
    }

    pub fn new_material(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Material, subtype)
    }

    pub fn new_sampler(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Sampler, subtype)
    }

    pub fn new_surface(&self) -> Result<Handle> {
        self.new_object(DataType::Surface, "")
    }

    pub fn new_spatial_field(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::SpatialField, subtype)
    }

    pub fn new_volume(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Volume, subtype)
    }

    pub fn new_group(&self) -> Result<Handle> {
        self.new_object(DataType::Group, "")
    }

    pub fn new_instance(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Instance, subtype)
    }

    /// A world together with the internal group/instance pair that hosts
    /// surfaces and volumes attached to it directly.
    pub fn new_world(&self) -> Result<Handle> {
        let state = self.state();
        let zero_group = state.create_internal(DataType::Group, "", ObjectBody::Group(Group::new()));
        let zero_instance = state.create_internal(DataType::Instance, "", ObjectBody::Instance(Instance::new()));
        zero_instance
            .params
            .lock()
            .set_direct("group", AnyValue::from_object(DataType::Group, zero_group.clone()));
        let world = World::new(zero_group, zero_instance);
        let record = state.create_object(DataType::World, "", ObjectBody::World(world));
        Ok(self.created(&record))
    }

    pub fn new_camera(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Camera, subtype)
    }

    pub fn new_renderer(&self, subtype: &str) -> Result<Handle> {
        self.new_object(DataType::Renderer, subtype)
    }

    pub fn new_frame(&self) -> Result<Handle> {
        self.new_object(DataType::Frame, "")
    }

    /// 1D array; an object element type produces an object array whose
    /// memory holds 64-bit handle ids.
    pub fn new_array1d(&self, desc: ArrayDescriptor) -> Result<Handle> {
        if desc.element_type.is_object() {
            let array = ObjectArray::new(desc)?;
            return Ok(self.new_object_array_record(array));
        }
        let array = Array1D::new(desc)?;
        let record = self.state().create_object(DataType::Array1D, "", ObjectBody::Array1D(array));
        Ok(self.created(&record))
    }

    pub fn new_array2d(&self, desc: ArrayDescriptor) -> Result<Handle> {
        reject_object_elements(&desc, DataType::Array2D)?;
        let array = Array2D::new(desc)?;
        let record = self.state().create_object(DataType::Array2D, "", ObjectBody::Array2D(array));
        Ok(self.created(&record))
    }

    pub fn new_array3d(&self, desc: ArrayDescriptor) -> Result<Handle> {
        reject_object_elements(&desc, DataType::Array3D)?;
        let array = Array3D::new(desc)?;
        let record = self.state().create_object(DataType::Array3D, "", ObjectBody::Array3D(array));
        Ok(self.created(&record))
    }

    /// Managed object array filled with `handles`.
    pub fn new_object_array(&self, kind: DataType, handles: &[Handle]) -> Result<Handle> {
        if !kind.is_object() {
            return Err(Error::InvalidArgument(format!("{kind} is not an object type")));
        }
        let mut array = ObjectArray::new(ArrayDescriptor::new_1d(kind, handles.len()))?;
        let ids: Vec<u64> = handles.iter().map(|h| h.id()).collect();
        array.core_mut().bytes_mut().copy_from_slice(bytemuck::cast_slice(&ids));
        Ok(self.new_object_array_record(array))
    }

    fn new_object_array_record(&self, array: ObjectArray) -> Handle {
        let state = self.state();
        let record = state.create_object(DataType::Array1D, "", ObjectBody::ObjectArray(array));
        let ctx = ObjectContext::new(state, &record);
        if let Some(a) = record.write().as_object_array_mut() {
            a.update_handles(&ctx);
        }
        self.created(&record)
    }

    // === Parameters ===

    fn store_parameter(&self, handle: Handle, name: &str, value: AnyValue) -> Result<()> {
        let record = self.lookup(handle)?;
        let changed = record.params.lock().set(name, value);
        if changed {
            record.mark_parameter_changed();
        }
        Ok(())
    }

    pub fn set_parameter<T: ValueType>(&self, handle: Handle, name: &str, value: T) -> Result<()> {
        self.store_parameter(handle, name, AnyValue::new(value))
    }

    /// Set a parameter from its tag and raw bytes. Object tags take a
    /// 64-bit handle id (0 unsets); string tags take UTF-8 bytes.
    pub fn set_parameter_raw(&self, handle: Handle, name: &str, ty: DataType, bytes: &[u8]) -> Result<()> {
        if ty.is_object() {
            let raw: [u8; HANDLE_SIZE] = bytes
                .try_into()
                .map_err(|_| Error::InvalidArgument(format!("object parameter '{name}' needs a 64-bit handle")))?;
            let target = Handle::from_id(u64::from_ne_bytes(raw));
            return self.set_parameter_object(handle, name, ty, target);
        }
        if ty == DataType::String {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| Error::InvalidArgument(format!("string parameter '{name}': {e}")))?;
            return self.set_parameter_string(handle, name, s);
        }
        self.store_parameter(handle, name, AnyValue::from_bytes(ty, bytes)?)
    }

    /// Reference another object. `None` removes the parameter.
    pub fn set_parameter_object(&self, handle: Handle, name: &str, ty: DataType, target: Option<Handle>) -> Result<()> {
        let Some(target) = target else {
            return self.unset_parameter(handle, name);
        };
        let object = self.lookup(target)?;
        if !ty.accepts_object(object.kind()) {
            return Err(Error::WrongObjectKind {
                expected: ty,
                actual: object.kind(),
            });
        }
        self.store_parameter(handle, name, AnyValue::from_object(ty, ObjectRef::new(&object)))
    }

    pub fn set_parameter_string(&self, handle: Handle, name: &str, value: &str) -> Result<()> {
        self.store_parameter(handle, name, AnyValue::from_string(value))
    }

    /// Parameters whose value is itself a type tag, such as frame channels.
    pub fn set_parameter_data_type(&self, handle: Handle, name: &str, value: DataType) -> Result<()> {
        self.store_parameter(handle, name, AnyValue::from_data_type(value))
    }

    pub fn unset_parameter(&self, handle: Handle, name: &str) -> Result<()> {
        let record = self.lookup(handle)?;
        let removed = record.params.lock().remove(name);
        if removed {
            record.mark_parameter_changed();
        }
        Ok(())
    }

    pub fn unset_all_parameters(&self, handle: Handle) -> Result<()> {
        let record = self.lookup(handle)?;
        let removed = record.params.lock().remove_all();
        if removed {
            record.mark_parameter_changed();
        }
        Ok(())
    }

    // === Lifecycle ===

    /// Bring derived state in line with the parameters. Objects without
    /// parameter changes since their last commit are left alone.
    pub fn commit_parameters(&self, handle: Handle) -> Result<()> {
        let record = self.lookup(handle)?;
        self.state().commit_object(&record);
        Ok(())
    }

    /// Process every queued commit and finalization.
    pub fn flush(&self) {
        self.state().flush_commits();
    }

    pub fn retain(&self, handle: Handle) -> Result<()> {
        self.lookup(handle)?.ref_inc(RefType::Public);
        Ok(())
    }

    pub fn release(&self, handle: Handle) -> Result<()> {
        let record = self.lookup(handle)?;
        if record.use_count(RefType::Public) == 0 {
            self.state().report(
                Severity::Warning,
                Some(handle),
                record.kind(),
                "object released more times than it was retained",
            );
            return Ok(());
        }
        record.ref_dec(RefType::Public);
        Ok(())
    }

    pub fn use_count(&self, handle: Handle, ty: RefType) -> Result<u64> {
        Ok(self.lookup(handle)?.use_count(ty))
    }

    pub fn commit_state(&self, handle: Handle) -> Result<CommitState> {
        Ok(self.lookup(handle)?.commit_state())
    }

    pub fn object_kind(&self, handle: Handle) -> Result<DataType> {
        Ok(self.lookup(handle)?.kind())
    }

    // === Properties ===

    fn query_property(&self, handle: Handle, name: &str, ty: DataType, wait: WaitMode) -> Option<AnyValue> {
        let record = self.lookup(handle).ok()?;
        if wait == WaitMode::Wait {
            self.state().wait_on_current_frame();
            self.state().flush_commits();
        }
        if name == "valid" && ty == DataType::Bool {
            return Some(AnyValue::new(Bool::new(record.is_valid())));
        }
        let ctx = ObjectContext::new(self.state(), &record);
        let value = record.write().get_property(name, ty, wait, &ctx);
        value
    }

    /// Typed property query. `None` if the object does not provide `name`
    /// as `T`, or (with `NoWait`) the value is not available yet.
    pub fn get_property<T: ValueType>(&self, handle: Handle, name: &str, wait: WaitMode) -> Option<T> {
        self.query_property(handle, name, T::TYPE, wait)?.get::<T>()
    }

    /// Write a property as `ty` into `out`; false if unavailable.
    pub fn get_property_raw(&self, handle: Handle, name: &str, ty: DataType, out: &mut [u8], wait: WaitMode) -> bool {
        self.query_property(handle, name, ty, wait)
            .is_some_and(|v| v.read_into(ty, out).is_ok())
    }

    // === Arrays ===

    /// Pointer to the array's backing memory, valid until `unmap_array`.
    pub fn map_array(&self, handle: Handle) -> Result<NonNull<u8>> {
        let record = self.lookup(handle)?;
        self.state().wait_on_current_frame();
        let ctx = ObjectContext::new(self.state(), &record);
        let ptr = record.write().map_array(&ctx);
        ptr.ok_or(Error::WrongObjectKind {
            expected: DataType::Array,
            actual: record.kind(),
        })
    }

    /// Publish the mapped contents to every dependent object.
    pub fn unmap_array(&self, handle: Handle) -> Result<()> {
        let record = self.lookup(handle)?;
        let ctx = ObjectContext::new(self.state(), &record);
        let unmapped = record.write().unmap_array(&ctx);
        if !unmapped {
            return Err(Error::WrongObjectKind {
                expected: DataType::Array,
                actual: record.kind(),
            });
        }
        if !self.config().defer_commits {
            self.state().flush_commits();
        }
        Ok(())
    }

    /// Copy `data` into the array starting at element `offset`.
    pub fn write_array<T: bytemuck::Pod>(&self, handle: Handle, offset: usize, data: &[T]) -> Result<()> {
        let record = self.lookup(handle)?;
        self.state().wait_on_current_frame();
        let src: &[u8] = bytemuck::cast_slice(data);
        {
            let mut body = record.write();
            let core = body.array_core_mut().ok_or(Error::WrongObjectKind {
                expected: DataType::Array,
                actual: record.kind(),
            })?;
            let out_of_range =
                || Error::InvalidArgument(format!("write of {} bytes at element {offset} out of range", src.len()));
            let start = offset.checked_mul(core.element_size()).ok_or_else(out_of_range)?;
            let end = start.checked_add(src.len()).ok_or_else(out_of_range)?;
            let dst = core.bytes_mut().get_mut(start..end).ok_or_else(out_of_range)?;
            dst.copy_from_slice(src);
            let ctx = ObjectContext::new(self.state(), &record);
            body.array_contents_changed(&ctx);
        }
        if !self.config().defer_commits {
            self.state().flush_commits();
        }
        Ok(())
    }

    // === Frames ===

    /// Start rendering `frame`; returns once the work is dispatched.
    pub fn render_frame(&self, frame: Handle) -> Result<()> {
        let record = self.lookup_kind(frame, DataType::Frame)?;
        self.state().wait_on_current_frame();
        self.state().flush_commits();
        let ctx = ObjectContext::new(self.state(), &record);
        if let Some(f) = record.write().as_frame_mut() {
            f.render(&ctx);
        }
        Ok(())
    }

    /// Whether the last render finished; `Wait` blocks until it has.
    pub fn frame_ready(&self, frame: Handle, wait: WaitMode) -> Result<bool> {
        let record = self.lookup_kind(frame, DataType::Frame)?;
        let mut body = record.write();
        let Some(f) = body.as_frame_mut() else {
            return Ok(true);
        };
        if wait == WaitMode::Wait {
            f.wait();
        }
        Ok(f.ready())
    }

    pub fn discard_frame(&self, frame: Handle) -> Result<()> {
        let record = self.lookup_kind(frame, DataType::Frame)?;
        if let Some(f) = record.write().as_frame_mut() {
            f.discard();
        }
        Ok(())
    }

    /// Copy of one output channel; waits for the render to finish.
    pub fn map_frame(&self, frame: Handle, channel: &str) -> Result<MappedChannel> {
        let record = self.lookup_kind(frame, DataType::Frame)?;
        let mut body = record.write();
        let mapped = body.as_frame_mut().map(|f| f.map(channel)).unwrap_or_else(MappedChannel::missing);
        Ok(mapped)
    }

    /// Mapped channels are copies, so unmapping only validates the handle.
    pub fn unmap_frame(&self, frame: Handle, _channel: &str) -> Result<()> {
        self.lookup_kind(frame, DataType::Frame).map(|_| ())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("objects", &self.state().live_object_count())
            .field("config", self.config())
            .finish()
    }
}

fn reject_object_elements(desc: &ArrayDescriptor, kind: DataType) -> Result<()> {
    if desc.element_type.is_object() {
        return Err(Error::InvalidArgument(format!(
            "{kind} cannot hold {} elements",
            desc.element_type
        )));
    }
    Ok(())
}

/// Body for a non-array, non-world kind; `None` for unimplemented subtypes.
fn make_body(kind: DataType, subtype: &str) -> Option<ObjectBody> {
    let body = match kind {
        DataType::Geometry => ObjectBody::Geometry(Geometry::new(GeometryKind::from_subtype(subtype)?)),
        DataType::Material => ObjectBody::Material(Material::new(MaterialKind::from_subtype(subtype)?)),
        DataType::Sampler => ObjectBody::Sampler(Sampler::new(SamplerKind::from_subtype(subtype)?)),
        DataType::Surface => ObjectBody::Surface(Surface::new()),
        DataType::SpatialField => ObjectBody::SpatialField(SpatialField::new(FieldKind::from_subtype(subtype)?)),
        DataType::Volume => ObjectBody::Volume(Volume::new(VolumeKind::from_subtype(subtype)?)),
        DataType::Group => ObjectBody::Group(Group::new()),
        DataType::Instance => match subtype {
            "" | "transform" => ObjectBody::Instance(Instance::new()),
            _ => return None,
        },
        DataType::Camera => ObjectBody::Camera(Camera::new(CameraKind::from_subtype(subtype)?)),
        DataType::Renderer => match subtype {
            "" | "default" => ObjectBody::Renderer(Renderer::new()),
            _ => return None,
        },
        DataType::Frame => ObjectBody::Frame(Frame::new()),
        _ => return None,
    };
    Some(body)
}
