//! Host memory behind arrays and the three ownership modes.

use std::fmt;
use std::ptr::NonNull;

use crate::util::{Error, Result};

/// Caller-owned memory handed to an array.
pub struct AppMemory {
    ptr: NonNull<u8>,
    len: usize,
}

// The pointer is only dereferenced under the array's own lock; the caller
// guarantees validity for the array's lifetime (see `from_raw`).
unsafe impl Send for AppMemory {}
unsafe impl Sync for AppMemory {}

impl AppMemory {
    /// Wrap `len` bytes at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// array releases it: for shared memory until the array is destroyed
    /// or privatized, for captured memory until the deleter runs. Nothing
    /// else may write the memory while the array is reading it.
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Wrap a mutable slice of plain values.
    ///
    /// # Safety
    ///
    /// Same contract as [`AppMemory::from_raw`]: the slice must outlive the
    /// array's use of it.
    pub unsafe fn from_slice<T: bytemuck::Pod>(slice: &mut [T]) -> Self {
        let bytes = bytemuck::cast_slice_mut::<T, u8>(slice);
        let len = bytes.len();
        Self {
            ptr: NonNull::new(bytes.as_mut_ptr()).unwrap_or(NonNull::dangling()),
            len,
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for AppMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppMemory({:p}, {} bytes)", self.ptr, self.len)
    }
}

/// Callback that releases captured memory; receives the wrapped pointer.
pub type MemoryDeleter = Box<dyn FnOnce(NonNull<u8>) + Send + Sync>;

/// Who owns an array's memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Caller memory, caller keeps responsibility
    Shared,
    /// Caller memory, released through a deleter
    Captured,
    /// Device-allocated
    Managed,
}

impl Ownership {
    /// Mode implied by which of (memory, deleter) are present.
    pub fn from_parts(has_memory: bool, has_deleter: bool) -> Self {
        match (has_memory, has_deleter) {
            (false, _) => Self::Managed,
            (true, false) => Self::Shared,
            (true, true) => Self::Captured,
        }
    }
}

/// Zero-initialized heap buffer aligned for any element type.
struct AlignedBuffer {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuffer {
    fn zeroed(len: usize) -> Result<Self> {
        let n = len.div_ceil(8);
        let mut words = Vec::new();
        words.try_reserve_exact(n).map_err(|_| Error::AllocationFailed(len))?;
        words.resize(n, 0);
        Ok(Self { words, len })
    }

    fn copy_of(bytes: &[u8]) -> Result<Self> {
        let mut buf = Self::zeroed(bytes.len())?;
        buf.as_bytes_mut().copy_from_slice(bytes);
        Ok(buf)
    }

    fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

enum Storage {
    App(AppMemory),
    Owned(AlignedBuffer),
}

/// Memory of one array plus its ownership bookkeeping.
pub(crate) struct HostBuffer {
    storage: Storage,
    ownership: Ownership,
    deleter: Option<MemoryDeleter>,
    privatized: bool,
    len: usize,
}

impl HostBuffer {
    /// Buffer for `len` bytes. App memory must cover at least `len` bytes.
    pub fn new(app_memory: Option<AppMemory>, deleter: Option<MemoryDeleter>, len: usize) -> Result<Self> {
        let ownership = Ownership::from_parts(app_memory.is_some(), deleter.is_some());
        let storage = match app_memory {
            Some(mem) => {
                if mem.len() < len {
                    return Err(Error::invalid(format!(
                        "application memory holds {} bytes, array needs {len}",
                        mem.len()
                    )));
                }
                Storage::App(mem)
            }
            None => Storage::Owned(AlignedBuffer::zeroed(len)?),
        };
        Ok(Self {
            storage,
            ownership,
            deleter,
            privatized: false,
            len,
        })
    }

    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    #[inline]
    pub fn was_privatized(&self) -> bool {
        self.privatized
    }

    /// True while the array still reads caller memory.
    pub fn references_app_memory(&self) -> bool {
        matches!(self.storage, Storage::App(_))
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        match &self.storage {
            Storage::App(mem) => mem.as_ptr(),
            Storage::Owned(buf) => {
                NonNull::new(buf.words.as_ptr() as *mut u8).unwrap_or(NonNull::dangling())
            }
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.storage {
            // SAFETY: AppMemory's contract keeps `len` bytes valid while the
            // array holds it; `len <= mem.len()` was checked in `new`.
            Storage::App(mem) => unsafe { std::slice::from_raw_parts(mem.as_ptr().as_ptr(), self.len) },
            Storage::Owned(buf) => buf.as_bytes(),
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            // SAFETY: as in `bytes`; `&mut self` excludes other array readers.
            Storage::App(mem) => unsafe {
                std::slice::from_raw_parts_mut(mem.as_ptr().as_ptr(), self.len)
            },
            Storage::Owned(buf) => buf.as_bytes_mut(),
        }
    }

    /// Replace caller memory with a private copy. Captured memory is handed
    /// back through its deleter. Returns false if there was nothing to do.
    pub fn privatize(&mut self) -> Result<bool> {
        if !self.references_app_memory() {
            return Ok(false);
        }
        let copy = AlignedBuffer::copy_of(self.bytes())?;
        let old = std::mem::replace(&mut self.storage, Storage::Owned(copy));
        self.privatized = true;
        if let Storage::App(mem) = old {
            self.release_app_memory(mem);
        }
        Ok(true)
    }

    fn release_app_memory(&mut self, mem: AppMemory) {
        if let Some(deleter) = self.deleter.take() {
            tracing::debug!(ptr = ?mem.as_ptr(), "invoking array deleter");
            deleter(mem.as_ptr());
        }
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        let storage = std::mem::replace(&mut self.storage, Storage::Owned(AlignedBuffer { words: Vec::new(), len: 0 }));
        match storage {
            Storage::App(mem) => self.release_app_memory(mem),
            Storage::Owned(_) if self.ownership == Ownership::Managed => {
                tracing::trace!(bytes = self.len, "freeing managed array");
            }
            Storage::Owned(_) => {}
        }
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("ownership", &self.ownership)
            .field("privatized", &self.privatized)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_ownership_from_parts() {
        assert_eq!(Ownership::from_parts(false, false), Ownership::Managed);
        assert_eq!(Ownership::from_parts(true, false), Ownership::Shared);
        assert_eq!(Ownership::from_parts(true, true), Ownership::Captured);
    }

    #[test]
    fn test_managed_is_zeroed_and_aligned() {
        let buf = HostBuffer::new(None, None, 13).expect("alloc");
        assert_eq!(buf.bytes(), &[0u8; 13]);
        assert_eq!(buf.as_ptr().as_ptr() as usize % 8, 0);
        assert_eq!(buf.ownership(), Ownership::Managed);
    }

    #[test]
    fn test_shared_privatize_copies() {
        let mut data = [1.0f32, 2.0, 3.0];
        let mem = unsafe { AppMemory::from_slice(&mut data) };
        let mut buf = HostBuffer::new(Some(mem), None, 12).expect("shared");
        assert!(buf.references_app_memory());

        assert!(buf.privatize().expect("copy"));
        assert!(!buf.privatize().expect("idempotent"));
        assert!(buf.was_privatized());
        assert_eq!(buf.ownership(), Ownership::Shared);

        data[0] = 99.0;
        let copy: &[f32] = bytemuck::cast_slice(buf.bytes());
        assert_eq!(copy, &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_captured_deleter_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut data = vec![7u32; 4];
        let mem = unsafe { AppMemory::from_slice(&mut data) };
        let c = Arc::clone(&calls);
        let deleter: MemoryDeleter = Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let mut buf = HostBuffer::new(Some(mem), Some(deleter), 16).expect("captured");
        assert_eq!(buf.ownership(), Ownership::Captured);
        buf.privatize().expect("copy");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        drop(buf);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_captured_deleter_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut data = vec![0u8; 8];
        let mem = unsafe { AppMemory::from_slice(&mut data) };
        let c = Arc::clone(&calls);
        let buf = HostBuffer::new(
            Some(mem),
            Some(Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })),
            8,
        )
        .expect("captured");
        drop(buf);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_app_memory_too_small() {
        let mut data = [0u8; 4];
        let mem = unsafe { AppMemory::from_slice(&mut data) };
        assert!(HostBuffer::new(Some(mem), None, 8).is_err());
    }
}
