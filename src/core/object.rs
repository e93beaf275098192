//! Object records: dual reference counts, timestamps and change observers.
//!
//! Every object created through the device is one [`ObjectRecord`] held in
//! an `Arc`. The record owns the object's [`ParameterTable`] and its
//! kind-specific body. Lifetime is governed by two counters:
//!
//! - the *public* count, owned by the application (`retain`/`release`)
//! - the *internal* count, owned by other objects through [`ObjectRef`]
//!
//! The body is destroyed exactly when both reach zero.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::num::NonZeroU64;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::params::ParameterTable;
use super::state::{Clock, DeviceState, TimeStamp};
use super::status::Severity;
use crate::device::ObjectBody;
use crate::util::DataType;

/// Opaque application-facing object handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Raw 64-bit id, as stored in object arrays.
    #[inline]
    pub fn id(self) -> u64 {
        self.0.get()
    }

    /// Handle from a raw id; 0 is the null handle.
    #[inline]
    pub fn from_id(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(#{})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which counter a reference operation applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefType {
    Public,
    Internal,
}

/// Commit lifecycle as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitState {
    /// Parameters changed since the last commit
    Uncommitted,
    /// Queued in the commit buffer
    CommitPending,
    /// Derived state matches the parameters
    Committed,
}

/// Shared state of one device object.
pub struct ObjectRecord {
    handle: Handle,
    kind: DataType,
    subtype: String,

    public_refs: AtomicU64,
    internal_refs: AtomicU64,
    destroyed: AtomicBool,

    last_parameter_changed: AtomicU64,
    last_updated: AtomicU64,
    last_committed: AtomicU64,
    last_finalized: AtomicU64,
    commit_pending: AtomicBool,

    observers: Mutex<Vec<Weak<ObjectRecord>>>,

    pub(crate) params: Mutex<ParameterTable>,
    pub(crate) body: RwLock<ObjectBody>,

    clock: Arc<Clock>,
    device: Weak<DeviceState>,
}

impl ObjectRecord {
    /// New record with one public and zero internal references.
    pub(crate) fn new(
        handle: Handle,
        kind: DataType,
        subtype: &str,
        body: ObjectBody,
        clock: Arc<Clock>,
        device: Weak<DeviceState>,
    ) -> Self {
        Self {
            handle,
            kind,
            subtype: subtype.to_owned(),
            public_refs: AtomicU64::new(1),
            internal_refs: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            last_parameter_changed: AtomicU64::new(0),
            last_updated: AtomicU64::new(0),
            last_committed: AtomicU64::new(0),
            last_finalized: AtomicU64::new(0),
            commit_pending: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            params: Mutex::new(ParameterTable::new()),
            body: RwLock::new(body),
            clock,
            device,
        }
    }

    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> DataType {
        self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    // === Reference counting ===

    pub fn use_count(&self, ty: RefType) -> u64 {
        match ty {
            RefType::Public => self.public_refs.load(Ordering::Acquire),
            RefType::Internal => self.internal_refs.load(Ordering::Acquire),
        }
    }

    /// Public plus internal references.
    pub fn total_count(&self) -> u64 {
        self.use_count(RefType::Public) + self.use_count(RefType::Internal)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn ref_inc(&self, ty: RefType) {
        match ty {
            RefType::Public => self.public_refs.fetch_add(1, Ordering::AcqRel),
            RefType::Internal => self.internal_refs.fetch_add(1, Ordering::AcqRel),
        };
    }

    /// Decrement one counter, firing the "no more public references" hook
    /// on a public 1 -> 0 transition and destroying the body at total 0.
    pub(crate) fn ref_dec(self: &Arc<Self>, ty: RefType) {
        let counter = match ty {
            RefType::Public => &self.public_refs,
            RefType::Internal => &self.internal_refs,
        };
        let prev = counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .unwrap_or(0);
        if prev == 0 {
            tracing::error!(handle = %self.handle, kind = %self.kind, ?ty, "reference count underflow");
            return;
        }

        if ty == RefType::Public && prev == 1 && self.use_count(RefType::Internal) > 0 {
            self.on_no_public_references();
        }

        if self.total_count() == 0 {
            self.destroy();
        }
    }

    fn on_no_public_references(self: &Arc<Self>) {
        let Some(state) = self.device.upgrade() else {
            return;
        };
        let ctx = ObjectContext::new(&state, self);
        self.body.write().on_no_public_references(&ctx);
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Take everything out before dropping so no lock is held while
        // owned references cascade.
        let body = std::mem::replace(&mut *self.body.write(), ObjectBody::Destroyed);
        let params = std::mem::take(&mut *self.params.lock());
        self.observers.lock().clear();
        drop(body);
        drop(params);

        tracing::trace!(handle = %self.handle, kind = %self.kind, "object destroyed");
        if let Some(state) = self.device.upgrade() {
            state.unregister(self.handle, self.kind);
        }
    }

    // === Timestamps ===

    pub fn last_parameter_changed(&self) -> TimeStamp {
        self.last_parameter_changed.load(Ordering::Acquire)
    }

    pub fn last_updated(&self) -> TimeStamp {
        self.last_updated.load(Ordering::Acquire)
    }

    pub fn last_committed(&self) -> TimeStamp {
        self.last_committed.load(Ordering::Acquire)
    }

    pub fn last_finalized(&self) -> TimeStamp {
        self.last_finalized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_parameter_changed(&self) {
        self.last_parameter_changed.store(self.clock.next(), Ordering::Release);
    }

    pub(crate) fn mark_updated(&self) {
        self.last_updated.store(self.clock.next(), Ordering::Release);
    }

    pub(crate) fn mark_committed(&self) {
        self.last_committed.store(self.clock.next(), Ordering::Release);
        self.mark_updated();
    }

    pub(crate) fn mark_finalized(&self) {
        self.last_finalized.store(self.clock.next(), Ordering::Release);
    }

    pub(crate) fn set_commit_pending(&self, pending: bool) {
        self.commit_pending.store(pending, Ordering::Release);
    }

    pub fn commit_state(&self) -> CommitState {
        if self.commit_pending.load(Ordering::Acquire) {
            CommitState::CommitPending
        } else if self.last_parameter_changed() > self.last_committed() {
            CommitState::Uncommitted
        } else {
            CommitState::Committed
        }
    }

    // === Change observers ===

    pub(crate) fn add_observer(&self, observer: &Arc<ObjectRecord>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| o.as_ptr() == Arc::as_ptr(observer)) {
            observers.push(Arc::downgrade(observer));
        }
    }

    pub(crate) fn remove_observer(&self, observer: *const ObjectRecord) {
        self.observers.lock().retain(|o| o.as_ptr() != observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Mark every live observer updated and queue it for finalization.
    pub(crate) fn notify_observers(&self, state: &DeviceState) {
        let live: Vec<Arc<ObjectRecord>> = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            if observer.is_destroyed() {
                continue;
            }
            observer.mark_updated();
            state.commit_buffer.add_to_finalize(ObjectRef::new(&observer));
        }
    }

    // === Body access ===

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ObjectBody> {
        self.body.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ObjectBody> {
        self.body.write()
    }

    /// Validity of the committed state.
    pub fn is_valid(&self) -> bool {
        !self.is_destroyed() && self.body.read().is_valid()
    }
}

impl fmt::Debug for ObjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRecord")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("subtype", &self.subtype)
            .field("public", &self.use_count(RefType::Public))
            .field("internal", &self.use_count(RefType::Internal))
            .finish()
    }
}

/// Internal reference to an object. Clone increments, drop decrements.
pub struct ObjectRef(Arc<ObjectRecord>);

impl ObjectRef {
    pub(crate) fn new(record: &Arc<ObjectRecord>) -> Self {
        record.ref_inc(RefType::Internal);
        Self(Arc::clone(record))
    }

    pub fn record(&self) -> &Arc<ObjectRecord> {
        &self.0
    }

    /// Handle identity.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        Self::new(&self.0)
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        self.0.ref_dec(RefType::Internal);
    }
}

impl Deref for ObjectRef {
    type Target = ObjectRecord;

    fn deref(&self) -> &ObjectRecord {
        &self.0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:?} {})", self.0.handle, self.0.kind)
    }
}

/// Object reference that registers its holder as a change observer of the
/// target for as long as it lives.
pub struct ObserverRef {
    object: ObjectRef,
    observer: Weak<ObjectRecord>,
}

impl ObserverRef {
    pub(crate) fn new(object: ObjectRef, observer: &Arc<ObjectRecord>) -> Self {
        object.add_observer(observer);
        Self {
            object,
            observer: Arc::downgrade(observer),
        }
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }
}

impl Drop for ObserverRef {
    fn drop(&mut self) {
        self.object.remove_observer(self.observer.as_ptr());
    }
}

impl Deref for ObserverRef {
    type Target = ObjectRef;

    fn deref(&self) -> &ObjectRef {
        &self.object
    }
}

impl fmt::Debug for ObserverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverRef({:?})", self.object)
    }
}

/// Per-call context handed to object implementations.
pub(crate) struct ObjectContext<'a> {
    pub state: &'a DeviceState,
    pub this: &'a Arc<ObjectRecord>,
}

impl<'a> ObjectContext<'a> {
    pub fn new(state: &'a DeviceState, this: &'a Arc<ObjectRecord>) -> Self {
        Self { state, this }
    }

    pub fn report(&self, severity: Severity, message: impl Into<String>) {
        self.state
            .report(severity, Some(self.this.handle()), self.this.kind(), message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.report(Severity::Warning, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.report(Severity::Debug, message);
    }

    pub fn notify_observers(&self) {
        self.this.notify_observers(self.state);
    }

    pub fn now(&self) -> TimeStamp {
        self.state.clock.next()
    }

    /// Watch `object` on behalf of the current object.
    pub fn observe(&self, object: ObjectRef) -> ObserverRef {
        ObserverRef::new(object, self.this)
    }
}

/// Kind-specific behavior behind an object record.
///
/// `commit_parameters` copies parameters into typed fields; `finalize`
/// derives expensive state from them.
pub(crate) trait ObjectImpl {
    fn commit_parameters(&mut self, _params: &ParameterTable, _ctx: &ObjectContext<'_>) {}

    fn finalize(&mut self, _ctx: &ObjectContext<'_>) {}

    fn is_valid(&self) -> bool {
        true
    }

    fn get_property(
        &mut self,
        _name: &str,
        _ty: crate::util::DataType,
        _wait: super::WaitMode,
        _ctx: &ObjectContext<'_>,
    ) -> Option<super::AnyValue> {
        None
    }

    fn on_no_public_references(&mut self, _ctx: &ObjectContext<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DeviceConfig, DeviceState};

    fn state() -> Arc<DeviceState> {
        DeviceState::new(DeviceConfig::default()).expect("device state")
    }

    #[test]
    fn test_handle_ids() {
        assert!(Handle::from_id(0).is_none());
        let h = Handle::from_id(42).expect("non-zero");
        assert_eq!(h.id(), 42);
        assert_eq!(format!("{h:?}"), "Handle(#42)");
    }

    #[test]
    fn test_internal_refs_follow_object_ref() {
        let state = state();
        let rec = state.create_object(DataType::Material, "matte", ObjectBody::Unknown);
        assert_eq!(rec.use_count(RefType::Public), 1);

        let a = ObjectRef::new(&rec);
        let b = a.clone();
        assert_eq!(rec.use_count(RefType::Internal), 2);
        drop(a);
        assert_eq!(rec.use_count(RefType::Internal), 1);
        drop(b);
        assert_eq!(rec.use_count(RefType::Internal), 0);
        assert!(!rec.is_destroyed());
    }

    #[test]
    fn test_destroyed_at_total_zero() {
        let state = state();
        let rec = state.create_object(DataType::Material, "matte", ObjectBody::Unknown);
        let internal = ObjectRef::new(&rec);

        rec.ref_dec(RefType::Public);
        assert!(!rec.is_destroyed());
        assert_eq!(rec.total_count(), 1);

        drop(internal);
        assert!(rec.is_destroyed());
        assert_eq!(rec.total_count(), 0);
        assert!(state.lookup(rec.handle()).is_err());
    }

    #[test]
    fn test_retain_release_balance() {
        let state = state();
        let rec = state.create_object(DataType::Surface, "", ObjectBody::Unknown);
        for _ in 0..5 {
            rec.ref_inc(RefType::Public);
        }
        let internal = ObjectRef::new(&rec);
        for _ in 0..5 {
            rec.ref_dec(RefType::Public);
        }
        assert_eq!(rec.use_count(RefType::Public), 1);
        assert_eq!(rec.use_count(RefType::Internal), 1);
        assert_eq!(rec.total_count(), 2);
        drop(internal);
    }

    #[test]
    fn test_observer_registration() {
        let state = state();
        let target = state.create_object(DataType::Array1D, "", ObjectBody::Unknown);
        let watcher = state.create_object(DataType::Group, "", ObjectBody::Unknown);

        let obs = ObserverRef::new(ObjectRef::new(&target), &watcher);
        assert_eq!(target.observer_count(), 1);

        let before = watcher.last_updated();
        target.notify_observers(&state);
        assert!(watcher.last_updated() > before);

        drop(obs);
        assert_eq!(target.observer_count(), 0);
    }

    #[test]
    fn test_commit_state_transitions() {
        let state = state();
        let rec = state.create_object(DataType::Material, "matte", ObjectBody::Unknown);
        assert_eq!(rec.commit_state(), CommitState::Committed);
        rec.mark_parameter_changed();
        assert_eq!(rec.commit_state(), CommitState::Uncommitted);
        rec.set_commit_pending(true);
        assert_eq!(rec.commit_state(), CommitState::CommitPending);
        rec.set_commit_pending(false);
        rec.mark_committed();
        assert_eq!(rec.commit_state(), CommitState::Committed);
    }
}
