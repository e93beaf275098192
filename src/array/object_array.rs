//! ObjectArray - 1D array of object handles.
//!
//! Backing memory holds raw 64-bit handle ids (0 = null). The array keeps
//! an internal reference on every object its memory names, plus a side list
//! of appended objects that are not in memory at all. Consumers iterate the
//! live sequence: non-null handles of the committed window, then the
//! appended ones.

use std::ptr::NonNull;
use std::sync::Arc;

use super::{ArrayCore, ArrayDescriptor, Window};
use crate::core::{ObjectContext, ObjectImpl, ObjectRecord, ObjectRef, ParameterTable, Severity};
use crate::util::{DataType, Result};

#[derive(Debug)]
pub(crate) struct ObjectArray {
    core: ArrayCore,
    window: Window,
    /// One entry per memory slot
    app_handles: Vec<Option<ObjectRef>>,
    appended: Vec<ObjectRef>,
    /// Borrowed view over the two lists above; holds no references
    live: Vec<Arc<ObjectRecord>>,
}

impl ObjectArray {
    pub fn new(desc: ArrayDescriptor) -> Result<Self> {
        let core = ArrayCore::new(desc)?;
        let window = Window::full(core.capacity());
        Ok(Self {
            core,
            window,
            app_handles: Vec::new(),
            appended: Vec::new(),
            live: Vec::new(),
        })
    }

    pub fn core(&self) -> &ArrayCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ArrayCore {
        &mut self.core
    }

    pub fn element_type(&self) -> DataType {
        self.core.element_type()
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Window-selected handles followed by appended ones. Callers that
    /// keep an entry wrap it in an [`ObjectRef`].
    pub fn handles(&self) -> &[Arc<ObjectRecord>] {
        &self.live
    }

    /// Slots in the committed window plus appended handles.
    pub fn size(&self) -> usize {
        self.window.len() + self.appended.len()
    }

    pub fn append_handle(&mut self, object: ObjectRef) {
        self.appended.push(object);
        self.rebuild_live();
    }

    pub fn remove_appended_handles(&mut self) {
        self.appended.clear();
        self.rebuild_live();
    }

    /// Re-read handle ids from memory and take references on them.
    pub fn update_handles(&mut self, ctx: &ObjectContext<'_>) {
        let element_type = self.core.element_type();
        let ids: Vec<u64> = bytemuck::pod_collect_to_vec(self.core.bytes());

        // Take the new references before dropping the old ones so objects
        // named in both stay alive.
        let mut fresh = Vec::with_capacity(ids.len());
        for (slot, id) in ids.into_iter().enumerate() {
            if id == 0 {
                fresh.push(None);
                continue;
            }
            let Some(record) = ctx.state.lookup_id(id) else {
                ctx.warn(format!("object array slot {slot} names invalid handle #{id}"));
                fresh.push(None);
                continue;
            };
            if !element_type.accepts_object(record.kind()) {
                ctx.warn(format!(
                    "object array of {element_type} holds a {} in slot {slot}",
                    record.kind()
                ));
                fresh.push(None);
                continue;
            }
            fresh.push(Some(ObjectRef::new(&record)));
        }
        let old = std::mem::replace(&mut self.app_handles, fresh);
        self.rebuild_live();
        drop(old);
    }

    fn rebuild_live(&mut self) {
        let windowed = self
            .app_handles
            .get(self.window.begin..self.window.end)
            .unwrap_or(&[])
            .iter()
            .flatten();
        self.live = windowed
            .chain(self.appended.iter())
            .map(|h| Arc::clone(h.record()))
            .collect();
    }

    pub fn map(&mut self, ctx: &ObjectContext<'_>) -> NonNull<u8> {
        self.core.map(ctx)
    }

    pub fn unmap(&mut self, ctx: &ObjectContext<'_>) {
        if self.core.unmap(ctx) {
            self.update_handles(ctx);
            ctx.notify_observers();
        }
    }

    pub fn privatize(&mut self, ctx: &ObjectContext<'_>) {
        if let Err(e) = self.core.privatize(ctx) {
            ctx.report(Severity::FatalError, format!("array privatization failed: {e}"));
        }
    }
}

impl ObjectImpl for ObjectArray {
    fn commit_parameters(&mut self, params: &ParameterTable, ctx: &ObjectContext<'_>) {
        let changed = self.window.update(
            params.get_index("begin"),
            params.get_index("end"),
            self.core.capacity(),
            ctx,
        );
        if changed {
            self.rebuild_live();
            ctx.notify_observers();
        }
    }

    fn finalize(&mut self, ctx: &ObjectContext<'_>) {
        self.update_handles(ctx);
    }

    fn is_valid(&self) -> bool {
        self.core.capacity() > 0 || !self.appended.is_empty()
    }

    fn on_no_public_references(&mut self, ctx: &ObjectContext<'_>) {
        self.privatize(ctx);
    }
}
