/// Platform hook that makes freshly written or patched code visible to
/// instruction fetch.
pub trait IcacheFlush: Send + Sync {
    fn flush(&self, addr: u64, len: usize);
}

/// Instruction-cache maintenance for the machine we run on.
///
/// AArch64 needs explicit cache maintenance after writing code; on
/// hosts with coherent instruction caches this is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostIcache;

impl IcacheFlush for HostIcache {
    #[cfg(all(target_arch = "aarch64", target_os = "linux"))]
    fn flush(&self, addr: u64, len: usize) {
        let begin = addr as *mut libc::c_char;
        // SAFETY: __clear_cache only performs cache maintenance on the
        // given range; it never dereferences it for writes.
        unsafe { __clear_cache(begin, begin.add(len)) };
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
    fn flush(&self, _addr: u64, _len: usize) {}
}

#[cfg(all(target_arch = "aarch64", target_os = "linux"))]
unsafe extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}
