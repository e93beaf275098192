//! Array1D - dense 1D array with a committed `[begin, end)` window.

use std::borrow::Cow;
use std::ptr::NonNull;

use super::attribute::{read_attribute, DEFAULT_ATTRIBUTE_VALUE};
use super::{ArrayCore, ArrayDescriptor, Window};
use crate::core::{ObjectContext, ObjectImpl, ParameterTable, Severity};
use crate::util::{Result, ValueType, Vec4};

#[derive(Debug)]
pub(crate) struct Array1D {
    core: ArrayCore,
    window: Window,
}

impl Array1D {
    pub fn new(desc: ArrayDescriptor) -> Result<Self> {
        let core = ArrayCore::new(desc)?;
        let window = Window::full(core.capacity());
        Ok(Self { core, window })
    }

    pub fn core(&self) -> &ArrayCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ArrayCore {
        &mut self.core
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Elements in the committed window.
    pub fn size(&self) -> usize {
        self.window.len()
    }

    /// Bytes of the committed window.
    pub fn bytes(&self) -> &[u8] {
        let s = self.core.element_size();
        self.core
            .bytes()
            .get(self.window.begin * s..self.window.end * s)
            .unwrap_or(&[])
    }

    /// Window contents as `T`; `None` if the element type differs.
    pub fn values<T: ValueType>(&self) -> Option<Cow<'_, [T]>> {
        self.core.typed(self.window.begin, self.window.end)
    }

    /// Element `i` of the window as an attribute value.
    pub fn attribute_at(&self, i: usize) -> Vec4 {
        if i >= self.size() {
            return DEFAULT_ATTRIBUTE_VALUE;
        }
        read_attribute(self.core.element_type(), self.bytes(), i)
    }

    /// Every window element as an attribute value.
    pub fn attribute_values(&self) -> Vec<Vec4> {
        (0..self.size()).map(|i| self.attribute_at(i)).collect()
    }

    pub fn map(&mut self, ctx: &ObjectContext<'_>) -> NonNull<u8> {
        self.core.map(ctx)
    }

    /// Unmap and tell dependents the contents changed.
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

impl ObjectImpl for Array1D {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        let changed = self.window.update(
            params.get_index("begin"),
            params.get_index("end"),
            self.core.capacity(),
            ctx,
        );
        if changed {
            ctx.notify_observers();
        }
    }

    fn is_valid(&self) -> bool {
        self.size() > 0
    }

    fn on_no_public_references(&mut self, ctx: &ObjectContext<'_>) {
        self.privatize(ctx);
    }
}
