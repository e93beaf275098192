//! Array2D - dense image-shaped array.

use std::ptr::NonNull;

use super::attribute::read_attribute;
use super::{ArrayCore, ArrayDescriptor};
use crate::core::{ObjectContext, ObjectImpl, Severity};
use crate::util::{interpolant, Result, Vec2, Vec4, WrapMode};

#[derive(Debug)]
pub(crate) struct Array2D {
    core: ArrayCore,
    dims: [usize; 2],
}

impl Array2D {
    pub fn new(desc: ArrayDescriptor) -> Result<Self> {
        let dims = [desc.items[0], desc.items[1]];
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

    pub fn dims(&self) -> [usize; 2] {
        self.dims
    }

    /// Texel `(x, y)` as a vec4 (row-major, x fastest).
    pub fn texel(&self, x: usize, y: usize) -> Vec4 {
        read_attribute(self.core.element_type(), self.core.bytes(), y * self.dims[0] + x)
    }

    /// Every texel as an attribute value, row-major.
    pub fn attribute_values(&self) -> Vec<Vec4> {
        let [w, h] = self.dims;
        (0..w * h)
            .map(|i| read_attribute(self.core.element_type(), self.core.bytes(), i))
            .collect()
    }

    /// Bilinear lookup at `uv` in `[0, 1]^2`, texel-centered.
    pub fn sample_bilinear(&self, uv: Vec2, wrap: WrapMode) -> Vec4 {
        let [w, h] = self.dims;
        let ix = interpolant(uv.x, w, true);
        let iy = interpolant(uv.y, h, true);
        let (x0, x1) = (wrap.wrap(ix.lower, w), wrap.wrap(ix.upper, w));
        let (y0, y1) = (wrap.wrap(iy.lower, h), wrap.wrap(iy.upper, h));

        let top = self.texel(x0, y0).lerp(self.texel(x1, y0), ix.frac);
        let bottom = self.texel(x0, y1).lerp(self.texel(x1, y1), ix.frac);
        top.lerp(bottom, iy.frac)
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

impl ObjectImpl for Array2D {
    fn is_valid(&self) -> bool {
        self.core.capacity() > 0
    }

    fn on_no_public_references(&mut self, ctx: &ObjectContext<'_>) {
        self.privatize(ctx);
    }
}
