use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use dbt_core::ExecHandle;
use thiserror::Error;

/// Default code region size: 16 MiB.
pub const DEFAULT_CODE_REGION_SIZE: usize = 16 * 1024 * 1024;

/// Alignment of every block handed out by the region.
const BLOCK_ALIGN: usize = 16;

#[derive(Debug, Error)]
pub enum ExecMemError {
    #[error("mmap of {size} bytes failed: {source}")]
    Map {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("code region exhausted: requested {requested} bytes, {remaining} remaining")]
    Exhausted { requested: usize, remaining: usize },
    #[error("{len} bytes at {addr:#x} are outside the code region")]
    OutOfBounds { addr: u64, len: usize },
    #[error("patch address {addr:#x} is not 4-byte aligned")]
    Misaligned { addr: u64 },
}

/// Source of executable memory for finished blocks.
///
/// Handles returned by `alloc_executable` stay valid until `reset`,
/// which needs exclusive access so no handle can be in use.
pub trait ExecutableMemory: Send + Sync {
    fn alloc_executable(&self, size: usize) -> Result<ExecHandle, ExecMemError>;

    /// Copy `code` to the start of `handle`.
    fn write(&self, handle: &ExecHandle, code: &[u8]) -> Result<(), ExecMemError>;

    /// Atomically replace one aligned instruction word at `addr`.
    fn patch_u32(&self, addr: u64, val: u32) -> Result<(), ExecMemError>;

    fn read_u32(&self, addr: u64) -> Result<u32, ExecMemError>;

    /// Bytes handed out so far.
    fn used(&self) -> usize;

    fn capacity(&self) -> usize;

    fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Forget every allocation.
    fn reset(&mut self);
}

/// Bump-allocated region of mmap'd RWX memory.
///
/// Allocation is lock-free (an atomic cursor), so concurrent
/// translators can claim disjoint ranges. Bytes are never reused
/// before [`ExecutableMemory::reset`].
pub struct CodeRegion {
    ptr: NonNull<u8>,
    size: usize,
    offset: AtomicUsize,
}

// SAFETY: CodeRegion owns its mapping. Concurrent writers only touch
// the disjoint ranges they allocated; patching uses atomic stores.
unsafe impl Send for CodeRegion {}
unsafe impl Sync for CodeRegion {}

impl CodeRegion {
    /// Map a new region of the given size (rounded up to page size).
    pub fn new(size: usize) -> Result<Self, ExecMemError> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);

        // SAFETY: anonymous private mapping, no file backing.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(ExecMemError::Map {
                size,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(raw as *mut u8).ok_or_else(|| ExecMemError::Map {
            size,
            source: io::Error::other("mmap returned null"),
        })?;
        log::debug!("code region mapped: {size} bytes at {:#x}", ptr.as_ptr() as usize);
        Ok(Self {
            ptr,
            size,
            offset: AtomicUsize::new(0),
        })
    }

    /// Allocate with the default size (16 MiB).
    pub fn with_default_size() -> Result<Self, ExecMemError> {
        Self::new(DEFAULT_CODE_REGION_SIZE)
    }

    #[inline]
    pub fn base_addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    /// Whether `addr..addr+len` lies inside the allocated part.
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        let base = self.base_addr();
        let used = self.offset.load(Ordering::Acquire) as u64;
        addr >= base && addr.saturating_add(len as u64) <= base + used
    }

    fn check(&self, addr: u64, len: usize) -> Result<(), ExecMemError> {
        if self.contains(addr, len) {
            Ok(())
        } else {
            Err(ExecMemError::OutOfBounds { addr, len })
        }
    }
}

impl ExecutableMemory for CodeRegion {
    fn alloc_executable(&self, size: usize) -> Result<ExecHandle, ExecMemError> {
        let aligned = (size + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1);
        let mut cur = self.offset.load(Ordering::Relaxed);
        loop {
            let remaining = self.size - cur;
            if aligned > remaining || size == 0 {
                return Err(ExecMemError::Exhausted {
                    requested: size,
                    remaining,
                });
            }
            match self.offset.compare_exchange_weak(
                cur,
                cur + aligned,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
        // SAFETY: cur + size <= self.size, inside the mapping, and the
        // range was claimed exclusively by the CAS above.
        unsafe {
            let start = NonNull::new_unchecked(self.ptr.as_ptr().add(cur));
            Ok(ExecHandle::from_raw_parts(start, size))
        }
    }

    fn write(&self, handle: &ExecHandle, code: &[u8]) -> Result<(), ExecMemError> {
        if code.len() > handle.len() {
            return Err(ExecMemError::OutOfBounds {
                addr: handle.addr(),
                len: code.len(),
            });
        }
        self.check(handle.addr(), code.len())?;
        // SAFETY: range checked above; the handle's owner is the only
        // writer until the block is published.
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), handle.as_ptr() as *mut u8, code.len());
        }
        Ok(())
    }

    fn patch_u32(&self, addr: u64, val: u32) -> Result<(), ExecMemError> {
        if addr % 4 != 0 {
            return Err(ExecMemError::Misaligned { addr });
        }
        self.check(addr, 4)?;
        // SAFETY: aligned, in bounds; a single-copy-atomic store so a
        // concurrently executing thread sees the old or the new word.
        unsafe { (*(addr as *const AtomicU32)).store(val, Ordering::Release) };
        Ok(())
    }

    fn read_u32(&self, addr: u64) -> Result<u32, ExecMemError> {
        if addr % 4 != 0 {
            return Err(ExecMemError::Misaligned { addr });
        }
        self.check(addr, 4)?;
        // SAFETY: aligned and in bounds.
        Ok(unsafe { (*(addr as *const AtomicU32)).load(Ordering::Acquire) })
    }

    fn used(&self) -> usize {
        self.offset.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.size
    }

    fn reset(&mut self) {
        *self.offset.get_mut() = 0;
    }
}

impl Drop for CodeRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size describe the mapping created in `new`.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
