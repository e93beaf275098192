//! Deferred two-phase commit.
//!
//! `commit_parameters` on the device only queues the object. A flush runs
//! `commit_parameters` on every queued object whose parameters changed,
//! then `finalize` on everything that was updated, lowest priority first so
//! leaves (arrays, geometry, materials) settle before the groups, instances
//! and worlds that read them. Finalizing can queue more work through change
//! observers; the flush loops until both queues drain.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::object::{ObjectContext, ObjectImpl, ObjectRef};
use super::state::DeviceState;
use crate::util::DataType;

/// Pending commit and finalize work.
#[derive(Default)]
pub(crate) struct CommitBuffer {
    commits: Mutex<Vec<ObjectRef>>,
    finalizations: Mutex<Vec<ObjectRef>>,
    flushing: AtomicBool,
}

impl CommitBuffer {
    pub fn add_to_commit(&self, object: ObjectRef) {
        let mut commits = self.commits.lock();
        if !commits.iter().any(|o| o.ptr_eq(&object)) {
            commits.push(object);
        }
    }

    pub fn add_to_finalize(&self, object: ObjectRef) {
        let mut finalizations = self.finalizations.lock();
        if !finalizations.iter().any(|o| o.ptr_eq(&object)) {
            finalizations.push(object);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commits.lock().is_empty() && self.finalizations.lock().is_empty()
    }

    fn take_commits(&self) -> Vec<ObjectRef> {
        std::mem::take(&mut *self.commits.lock())
    }

    fn take_finalizations(&self) -> Vec<ObjectRef> {
        std::mem::take(&mut *self.finalizations.lock())
    }
}

/// Finalize order: lower runs first.
pub(crate) fn commit_priority(kind: DataType) -> u8 {
    match kind {
        DataType::Frame => 7,
        DataType::Renderer | DataType::Camera => 6,
        DataType::World => 5,
        DataType::Instance => 4,
        DataType::Group => 3,
        DataType::Surface | DataType::Volume => 2,
        DataType::Material | DataType::SpatialField => 1,
        _ => 0,
    }
}

/// Advance the device-wide rebuild requests after `kind` finalized.
pub(crate) fn request_updates(state: &DeviceState, kind: DataType) {
    match kind {
        DataType::Surface | DataType::Volume | DataType::Group => {
            state.requests.request_bls_reconstruct(state.clock.next())
        }
        DataType::Geometry => state.requests.request_bls_commit(state.clock.next()),
        DataType::Instance => state.requests.request_tls_reconstruct(state.clock.next()),
        _ => {}
    }
}

impl DeviceState {
    /// Drain the commit buffer. Returns false if a flush was already running
    /// (re-entrant calls from inside a flush are no-ops).
    pub(crate) fn flush_commits(&self) -> bool {
        if self.commit_buffer.flushing.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.wait_on_current_frame();

        let _span = tracing::debug_span!("flush_commits").entered();
        let mut committed = 0usize;
        let mut finalized = 0usize;

        loop {
            let commits = self.commit_buffer.take_commits();
            for object in commits {
                object.set_commit_pending(false);
                if object.is_destroyed() || object.last_parameter_changed() <= object.last_committed() {
                    continue;
                }
                // Work on a snapshot so no parameter lock is held while
                // the object body runs.
                let params = object.params.lock().clone();
                {
                    let ctx = ObjectContext::new(self, object.record());
                    object.write().commit_parameters(&params, &ctx);
                }
                drop(params);
                object.mark_committed();
                committed += 1;
                self.commit_buffer.add_to_finalize(object);
            }

            let mut finalizations = self.commit_buffer.take_finalizations();
            if finalizations.is_empty() {
                if self.commit_buffer.is_empty() {
                    break;
                }
                continue;
            }
            finalizations.sort_by_key(|o| commit_priority(o.kind()));
            for object in finalizations {
                if object.is_destroyed() || object.last_updated() <= object.last_finalized() {
                    continue;
                }
                {
                    let ctx = ObjectContext::new(self, object.record());
                    object.write().finalize(&ctx);
                }
                object.mark_finalized();
                request_updates(self, object.kind());
                finalized += 1;
            }
        }

        if committed + finalized > 0 {
            tracing::debug!(committed, finalized, "commit buffer flushed");
        }
        self.commit_buffer.flushing.store(false, Ordering::Release);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceConfig;
    use crate::device::ObjectBody;
    use std::sync::Arc;

    #[test]
    fn test_priorities_leaves_first() {
        assert!(commit_priority(DataType::Array1D) < commit_priority(DataType::Surface));
        assert!(commit_priority(DataType::Geometry) < commit_priority(DataType::Surface));
        assert!(commit_priority(DataType::Sampler) < commit_priority(DataType::Material));
        assert!(commit_priority(DataType::Surface) < commit_priority(DataType::Group));
        assert!(commit_priority(DataType::Group) < commit_priority(DataType::Instance));
        assert!(commit_priority(DataType::Instance) < commit_priority(DataType::World));
        assert!(commit_priority(DataType::World) < commit_priority(DataType::Frame));
    }

    #[test]
    fn test_dedupe() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let rec = state.create_object(DataType::Material, "matte", ObjectBody::Unknown);
        state.commit_buffer.add_to_commit(ObjectRef::new(&rec));
        state.commit_buffer.add_to_commit(ObjectRef::new(&rec));
        assert_eq!(rec.use_count(crate::core::RefType::Internal), 1);
        assert!(!state.commit_buffer.is_empty());
        state.flush_commits();
        assert!(state.commit_buffer.is_empty());
        assert_eq!(rec.use_count(crate::core::RefType::Internal), 0);
    }

    #[test]
    fn test_flush_commits_changed_only() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let rec: Arc<_> = state.create_object(DataType::Material, "matte", ObjectBody::Unknown);

        rec.mark_parameter_changed();
        state.commit_buffer.add_to_commit(ObjectRef::new(&rec));
        state.flush_commits();
        let first = rec.last_committed();
        assert!(first > 0);
        assert!(rec.last_finalized() > first);

        // Nothing changed: queued again but not recommitted
        state.commit_buffer.add_to_commit(ObjectRef::new(&rec));
        state.flush_commits();
        assert_eq!(rec.last_committed(), first);
    }

    #[test]
    fn test_finalize_bumps_requests() {
        let state = DeviceState::new(DeviceConfig::default()).expect("state");
        let geom = state.create_object(DataType::Geometry, "triangle", ObjectBody::Unknown);
        geom.mark_parameter_changed();
        state.commit_buffer.add_to_commit(ObjectRef::new(&geom));
        state.flush_commits();
        assert!(state.requests.bls_commit() > 0);
        assert_eq!(state.requests.tls_reconstruct(), 0);
    }
}
