//! Array3D - dense volume-shaped array.

use std::borrow::Cow;
use std::ptr::NonNull;

use super::attribute::read_attribute;
use super::{ArrayCore, ArrayDescriptor};
use crate::core::{ObjectContext, ObjectImpl, Severity};
use crate::util::{Result, UVec3, ValueType, Vec4};

#[derive(Debug)]
pub(crate) struct Array3D {
    core: ArrayCore,
    dims: [usize; 3],
}

impl Array3D {
    pub fn new(desc: ArrayDescriptor) -> Result<Self> {
        let dims = desc.items;
        Ok(Self {
            core: ArrayCore::new(desc)?,
            dims,
        })
    }

    pub fn core(&self) -> &ArrayCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ArrayCore {
        &mut self.core
    }

    pub fn dims(&self) -> UVec3 {
        UVec3::new(self.dims[0] as u32, self.dims[1] as u32, self.dims[2] as u32)
    }

    /// Every element as an attribute value, x fastest.
    pub fn attribute_values(&self) -> Vec<Vec4> {
        let ty = self.core.element_type();
        (0..self.core.capacity())
            .map(|i| read_attribute(ty, self.core.bytes(), i))
            .collect()
    }

    /// All elements as `T`, x fastest; `None` if the element type differs.
    pub fn values<T: ValueType>(&self) -> Option<Cow<'_, [T]>> {
        self.core.typed(0, self.core.capacity())
    }

    pub fn map(&mut self, ctx: &ObjectContext<'_>) -> NonNull<u8> {
        self.core.map(ctx)
    }

    pub fn unmap(&mut self, ctx: &ObjectContext<'_>) {
        if self.core.unmap(ctx) {
            ctx.notify_observers();
        }
    }

    pub fn privatize(&mut self, ctx: &ObjectContext<'_>) {
        if let Err(e) = self.core.privatize(ctx) {
            ctx.report(Severity::FatalError, format!("array privatization failed: {e}"));
        }
    }
}

impl ObjectImpl for Array3D {
    fn is_valid(&self) -> bool {
        self.core.capacity() > 0
    }

    fn on_no_public_references(&mut self, ctx: &ObjectContext<'_>) {
        self.privatize(ctx);
    }
}
