//! Array family: dense 1D/2D/3D arrays and object arrays.
//!
//! Arrays wrap host memory in one of three ownership modes (see
//! [`Ownership`]). Caller-owned memory stays referenced until the
//! application drops its last public reference while other objects still
//! use the array; at that point the array privatizes a copy so the caller's
//! buffer is never touched again.

mod array1d;
mod array2d;
mod array3d;
mod attribute;
mod memory;
mod object_array;

pub use attribute::{is_attribute_type, read_attribute, sample_linear, DEFAULT_ATTRIBUTE_VALUE};
pub use memory::{AppMemory, MemoryDeleter, Ownership};

pub(crate) use array1d::Array1D;
pub(crate) use array2d::Array2D;
pub(crate) use array3d::Array3D;
pub(crate) use object_array::ObjectArray;

use std::borrow::Cow;
use std::fmt;
use std::ptr::NonNull;

use crate::core::{ObjectContext, Severity};
use crate::util::{cast_elements, DataType, Error, Result, ValueType, HANDLE_SIZE};
use memory::HostBuffer;

/// Everything needed to create an array.
pub struct ArrayDescriptor {
    pub element_type: DataType,
    /// Items per dimension; unused dimensions are 1
    pub items: [usize; 3],
    /// Byte stride per dimension; 0 means packed
    pub byte_strides: [u64; 3],
    pub app_memory: Option<AppMemory>,
    pub deleter: Option<MemoryDeleter>,
}

impl ArrayDescriptor {
    pub fn new_1d(element_type: DataType, n: usize) -> Self {
        Self::with_items(element_type, [n, 1, 1])
    }

    pub fn new_2d(element_type: DataType, w: usize, h: usize) -> Self {
        Self::with_items(element_type, [w, h, 1])
    }

    pub fn new_3d(element_type: DataType, x: usize, y: usize, z: usize) -> Self {
        Self::with_items(element_type, [x, y, z])
    }

    fn with_items(element_type: DataType, items: [usize; 3]) -> Self {
        Self {
            element_type,
            items,
            byte_strides: [0; 3],
            app_memory: None,
            deleter: None,
        }
    }

    pub fn strides(mut self, byte_strides: [u64; 3]) -> Self {
        self.byte_strides = byte_strides;
        self
    }

    /// Borrow caller memory without taking ownership.
    pub fn shared(mut self, memory: AppMemory) -> Self {
        self.app_memory = Some(memory);
        self.deleter = None;
        self
    }

    /// Take caller memory, released through `deleter`.
    pub fn captured(mut self, memory: AppMemory, deleter: MemoryDeleter) -> Self {
        self.app_memory = Some(memory);
        self.deleter = Some(deleter);
        self
    }

    pub fn ownership(&self) -> Ownership {
        Ownership::from_parts(self.app_memory.is_some(), self.deleter.is_some())
    }

    pub fn total_items(&self) -> usize {
        self.items.iter().product()
    }

    /// Byte size of one element; handles for object element types.
    pub fn element_size(&self) -> Result<usize> {
        if self.element_type.is_object() {
            return Ok(HANDLE_SIZE);
        }
        self.element_type.try_size()
    }

    /// Reject anything but densely packed layouts.
    pub fn validate(&self) -> Result<usize> {
        if self.element_type == DataType::String {
            return Err(Error::invalid("string arrays are not supported"));
        }
        let element_size = self.element_size()?;
        let mut packed = element_size as u64;
        for (k, stride) in self.byte_strides.iter().enumerate() {
            if *stride != 0 && *stride != packed {
                return Err(Error::UnsupportedLayout {
                    element: self.element_type,
                    element_size,
                    stride: *stride,
                });
            }
            packed = packed.saturating_mul(self.items[k] as u64);
        }
        Ok(element_size)
    }
}

impl fmt::Debug for ArrayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayDescriptor")
            .field("element_type", &self.element_type)
            .field("items", &self.items)
            .field("byte_strides", &self.byte_strides)
            .field("ownership", &self.ownership())
            .finish()
    }
}

/// State shared by every array kind.
#[derive(Debug)]
pub(crate) struct ArrayCore {
    element_type: DataType,
    element_size: usize,
    capacity: usize,
    buffer: HostBuffer,
    mapped: bool,
}

impl ArrayCore {
    pub fn new(desc: ArrayDescriptor) -> Result<Self> {
        let element_size = desc.validate()?;
        let capacity = desc.total_items();
        let bytes = capacity
            .checked_mul(element_size)
            .ok_or(Error::AllocationFailed(usize::MAX))?;
        let buffer = HostBuffer::new(desc.app_memory, desc.deleter, bytes)?;
        Ok(Self {
            element_type: desc.element_type,
            element_size,
            capacity,
            buffer,
            mapped: false,
        })
    }

    #[inline]
    pub fn element_type(&self) -> DataType {
        self.element_type
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ownership(&self) -> Ownership {
        self.buffer.ownership()
    }

    pub fn was_privatized(&self) -> bool {
        self.buffer.was_privatized()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Full addressable contents.
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.bytes_mut()
    }

    /// Elements `[begin, end)` as `T` (tag must match).
    pub fn typed<T: ValueType>(&self, begin: usize, end: usize) -> Option<Cow<'_, [T]>> {
        if T::TYPE != self.element_type {
            return None;
        }
        let bytes = self
            .bytes()
            .get(begin * self.element_size..end * self.element_size)?;
        Some(cast_elements(bytes))
    }

    /// Pointer for direct writes. Mapping twice is reported, not fatal.
    pub fn map(&mut self, ctx: &ObjectContext<'_>) -> NonNull<u8> {
        if self.mapped {
            ctx.warn("array mapped again without being previously unmapped");
        }
        self.mapped = true;
        self.buffer.as_ptr()
    }

    /// End direct writes. Returns false (after a Warning) if not mapped.
    pub fn unmap(&mut self, ctx: &ObjectContext<'_>) -> bool {
        if !self.mapped {
            ctx.warn("array unmapped again without being previously mapped");
            return false;
        }
        self.mapped = false;
        true
    }

    /// Copy caller memory into a private buffer. Idempotent.
    pub fn privatize(&mut self, ctx: &ObjectContext<'_>) -> Result<()> {
        if !self.buffer.references_app_memory() {
            return Ok(());
        }
        ctx.report(
            Severity::PerformanceWarning,
            format!(
                "making private copy of {:?} array ({} x {}) | ownership: ({}:{})",
                self.ownership(),
                self.capacity,
                self.element_type,
                ctx.this.use_count(crate::core::RefType::Public),
                ctx.this.use_count(crate::core::RefType::Internal),
            ),
        );
        self.buffer.privatize()?;
        Ok(())
    }
}

/// Committed `[begin, end)` range of a 1D array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Window {
    pub begin: usize,
    pub end: usize,
}

impl Window {
    pub fn full(capacity: usize) -> Self {
        Self {
            begin: 0,
            end: capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Clamp a requested window into `[0, capacity]`.
    ///
    /// Out-of-order bounds are swapped with one Warning; an empty result is
    /// reported and leaves the window unchanged. Returns true on change.
    pub fn update(&mut self, begin: Option<u64>, end: Option<u64>, capacity: usize, ctx: &ObjectContext<'_>) -> bool {
        let clamp = |v: u64| usize::try_from(v).unwrap_or(usize::MAX);
        let mut b = begin.map(clamp).unwrap_or(0).min(capacity.saturating_sub(1));
        let mut e = end.map(clamp).unwrap_or(capacity).max(1).min(capacity);

        if b == e {
            ctx.warn("array size must be greater than zero");
            return false;
        }
        if b > e {
            ctx.warn("array 'begin' is not less than 'end', swapping values");
            std::mem::swap(&mut b, &mut e);
        }

        let next = Self { begin: b, end: e };
        let changed = next != *self;
        *self = next;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_strides() {
        let d = ArrayDescriptor::new_1d(DataType::Float32Vec3, 4);
        assert_eq!(d.validate().expect("packed"), 12);
        let d = ArrayDescriptor::new_1d(DataType::Float32Vec3, 4).strides([12, 0, 0]);
        assert!(d.validate().is_ok());
        let d = ArrayDescriptor::new_1d(DataType::Float32Vec3, 4).strides([16, 0, 0]);
        assert!(matches!(d.validate(), Err(Error::UnsupportedLayout { stride: 16, .. })));
    }

    #[test]
    fn test_compact_strides_3d() {
        let d = ArrayDescriptor::new_3d(DataType::Float32, 2, 3, 4).strides([4, 8, 24]);
        assert!(d.validate().is_ok());
        let d = ArrayDescriptor::new_3d(DataType::Float32, 2, 3, 4).strides([4, 12, 0]);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_object_elements_are_handles() {
        let d = ArrayDescriptor::new_1d(DataType::Surface, 3);
        assert_eq!(d.element_size().expect("handle"), HANDLE_SIZE);
        assert!(ArrayDescriptor::new_1d(DataType::Unknown, 3).validate().is_err());
    }

    #[test]
    fn test_core_typed_view() {
        let mut core = ArrayCore::new(ArrayDescriptor::new_1d(DataType::UInt32, 4)).expect("managed");
        core.bytes_mut().copy_from_slice(bytemuck::cast_slice(&[1u32, 2, 3, 4]));
        assert_eq!(core.typed::<u32>(1, 3).expect("u32").as_ref(), &[2, 3]);
        assert!(core.typed::<f32>(0, 4).is_none());
        assert!(core.typed::<u32>(0, 5).is_none());
    }
}
