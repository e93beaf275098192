//! Device-wide state shared by every object of one device.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::commit::CommitBuffer;
use super::config::DeviceConfig;
use super::object::{CommitState, Handle, ObjectContext, ObjectImpl, ObjectRecord, RefType};
use super::status::{trace_status, Severity, StatusCallback, StatusMessage};
use crate::device::ObjectBody;
use crate::util::{DataType, Error, Result};

/// Point on the device clock. Zero means "never".
pub type TimeStamp = u64;

/// Monotonic device clock.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicU64,
}

impl Clock {
    /// A stamp strictly greater than every earlier one.
    #[inline]
    pub fn next(&self) -> TimeStamp {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn now(&self) -> TimeStamp {
        self.last.load(Ordering::Acquire)
    }
}

/// Latest structural change requests, compared against the World's checks.
#[derive(Debug, Default)]
pub struct UpdateRequests {
    bls_reconstruct: AtomicU64,
    bls_commit: AtomicU64,
    tls_reconstruct: AtomicU64,
}

impl UpdateRequests {
    pub fn bls_reconstruct(&self) -> TimeStamp {
        self.bls_reconstruct.load(Ordering::Acquire)
    }

    pub fn bls_commit(&self) -> TimeStamp {
        self.bls_commit.load(Ordering::Acquire)
    }

    pub fn tls_reconstruct(&self) -> TimeStamp {
        self.tls_reconstruct.load(Ordering::Acquire)
    }

    pub(crate) fn request_bls_reconstruct(&self, t: TimeStamp) {
        self.bls_reconstruct.fetch_max(t, Ordering::AcqRel);
    }

    pub(crate) fn request_bls_commit(&self, t: TimeStamp) {
        self.bls_commit.fetch_max(t, Ordering::AcqRel);
    }

    pub(crate) fn request_tls_reconstruct(&self, t: TimeStamp) {
        self.tls_reconstruct.fetch_max(t, Ordering::AcqRel);
    }
}

/// One-shot completion flag with blocking wait.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    pub fn is_done(&self) -> bool {
        *self.done.lock()
    }

    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }
}

/// Registry, clock, commit queue and reporting channel of one device.
pub struct DeviceState {
    pub(crate) config: DeviceConfig,
    pub(crate) clock: Arc<Clock>,
    pub(crate) requests: UpdateRequests,
    pub(crate) commit_buffer: CommitBuffer,
    pub(crate) pool: Arc<rayon::ThreadPool>,

    objects: RwLock<HashMap<Handle, Arc<ObjectRecord>>>,
    next_handle: AtomicU64,
    counts: Mutex<BTreeMap<DataType, usize>>,
    status: RwLock<Option<StatusCallback>>,
    current_frame: Mutex<Option<Arc<Completion>>>,
    self_ref: Weak<DeviceState>,
}

impl DeviceState {
    pub fn new(config: DeviceConfig) -> Result<Arc<Self>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("prism-render-{i}"))
            .build()
            .map_err(|e| Error::other(format!("thread pool: {e}")))?;

        Ok(Arc::new_cyclic(|self_ref| Self {
            config,
            clock: Arc::new(Clock::default()),
            requests: UpdateRequests::default(),
            commit_buffer: CommitBuffer::default(),
            pool: Arc::new(pool),
            objects: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            counts: Mutex::new(BTreeMap::new()),
            status: RwLock::new(None),
            current_frame: Mutex::new(None),
            self_ref: self_ref.clone(),
        }))
    }

    // === Registry ===

    /// Register a new object with one public reference.
    pub(crate) fn create_object(&self, kind: DataType, subtype: &str, body: ObjectBody) -> Arc<ObjectRecord> {
        let id = self.next_handle.fetch_add(1, Ordering::AcqRel);
        let handle = Handle::from_id(id).unwrap_or_else(|| unreachable!("handle ids start at 1"));
        let record = Arc::new(ObjectRecord::new(
            handle,
            kind,
            subtype,
            body,
            Arc::clone(&self.clock),
            self.self_ref.clone(),
        ));
        self.objects.write().insert(handle, Arc::clone(&record));
        *self.counts.lock().entry(kind).or_insert(0) += 1;
        record
    }

    /// Object held only through internal references (never handed out).
    pub(crate) fn create_internal(&self, kind: DataType, subtype: &str, body: ObjectBody) -> super::ObjectRef {
        let record = self.create_object(kind, subtype, body);
        let object = super::ObjectRef::new(&record);
        record.ref_dec(RefType::Public);
        object
    }

    pub(crate) fn unregister(&self, handle: Handle, kind: DataType) {
        let removed = self.objects.write().remove(&handle);
        if removed.is_some() {
            if let Some(n) = self.counts.lock().get_mut(&kind) {
                *n = n.saturating_sub(1);
            }
        }
        // Drop the registry's Arc outside the lock
        drop(removed);
    }

    pub fn lookup(&self, handle: Handle) -> Result<Arc<ObjectRecord>> {
        self.objects
            .read()
            .get(&handle)
            .filter(|r| !r.is_destroyed())
            .cloned()
            .ok_or(Error::InvalidHandle(handle.id()))
    }

    pub(crate) fn lookup_id(&self, id: u64) -> Option<Arc<ObjectRecord>> {
        Handle::from_id(id).and_then(|h| self.lookup(h).ok())
    }

    /// Live objects per kind.
    pub fn object_counts(&self) -> BTreeMap<DataType, usize> {
        self.counts.lock().iter().filter(|(_, n)| **n > 0).map(|(k, n)| (*k, *n)).collect()
    }

    pub fn live_object_count(&self) -> usize {
        self.objects.read().len()
    }

    // === Status ===

    pub fn set_status_callback(&self, callback: Option<StatusCallback>) {
        *self.status.write() = callback;
    }

    pub fn report(&self, severity: Severity, source: Option<Handle>, source_kind: DataType, message: impl Into<String>) {
        let msg = StatusMessage {
            severity,
            source,
            source_kind,
            message: message.into(),
        };
        trace_status(&msg);
        if severity == Severity::Debug && !self.config.report_debug {
            return;
        }
        let callback = self.status.read().clone();
        if let Some(cb) = callback {
            cb(&msg);
        }
    }

    // === Frames ===

    pub(crate) fn set_current_frame(&self, completion: Arc<Completion>) {
        *self.current_frame.lock() = Some(completion);
    }

    /// Block until the most recently started frame has finished.
    pub(crate) fn wait_on_current_frame(&self) {
        let current = self.current_frame.lock().clone();
        if let Some(c) = current {
            c.wait();
        }
    }

    // === Commit ===

    /// Queue `record` for commit and notify its observers; flush unless
    /// commits are deferred. Objects without parameter changes are skipped.
    pub(crate) fn commit_object(&self, record: &Arc<ObjectRecord>) {
        if record.commit_state() != CommitState::Uncommitted {
            return;
        }
        record.set_commit_pending(true);
        self.commit_buffer.add_to_commit(super::ObjectRef::new(record));
        record.notify_observers(self);
        if !self.config.defer_commits {
            self.flush_commits();
        }
    }

    /// Commit and finalize an internal object right away.
    pub(crate) fn commit_now(&self, record: &Arc<ObjectRecord>) {
        let ctx = ObjectContext::new(self, record);
        let params = record.params.lock().clone();
        record.write().commit_parameters(&params, &ctx);
        drop(params);
        record.mark_committed();
        record.write().finalize(&ctx);
        record.mark_finalized();
        super::commit::request_updates(self, record.kind());
    }

    /// Report leaks and release every remaining object.
    pub(crate) fn teardown(&self) {
        self.wait_on_current_frame();
        for (kind, n) in self.object_counts() {
            self.report(
                Severity::Warning,
                None,
                kind,
                format!("detected {n} leaked {kind} object(s)"),
            );
        }
        let records: Vec<Arc<ObjectRecord>> = self.objects.write().drain().map(|(_, r)| r).collect();
        // Break reference cycles between leaked objects
        let bodies: Vec<ObjectBody> = records
            .iter()
            .map(|r| std::mem::replace(&mut *r.write(), ObjectBody::Destroyed))
            .collect();
        drop(bodies);
        for r in &records {
            std::mem::take(&mut *r.params.lock());
        }
    }
}
