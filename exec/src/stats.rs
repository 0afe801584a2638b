use std::sync::atomic::{AtomicU64, Ordering};

/// Translation counters of one [`ExecEnv`](crate::ExecEnv).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationStats {
    /// Blocks installed.
    pub blocks: u64,
    /// Guest instructions translated.
    pub insns: u64,
    /// Instructions replaced by a host NOP.
    pub unsupported: u64,
    /// Blocks cut short by undecodable bytes.
    pub decode_faults: u64,
    /// Translations that failed for lack of buffer, region or cache space.
    pub overflows: u64,
    pub links: u64,
    /// Chain sites restored to `B +4`.
    pub unlinks: u64,
    /// Links refused for range or cycles.
    pub link_failures: u64,
    pub invalidations: u64,
    pub flushes: u64,
    pub peephole_rewrites: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub blocks: AtomicU64,
    pub insns: AtomicU64,
    pub unsupported: AtomicU64,
    pub decode_faults: AtomicU64,
    pub overflows: AtomicU64,
    pub links: AtomicU64,
    pub unlinks: AtomicU64,
    pub link_failures: AtomicU64,
    pub invalidations: AtomicU64,
    pub flushes: AtomicU64,
    pub peephole_rewrites: AtomicU64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl StatCounters {
    pub fn snapshot(&self) -> TranslationStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TranslationStats {
            blocks: get(&self.blocks),
            insns: get(&self.insns),
            unsupported: get(&self.unsupported),
            decode_faults: get(&self.decode_faults),
            overflows: get(&self.overflows),
            links: get(&self.links),
            unlinks: get(&self.unlinks),
            link_failures: get(&self.link_failures),
            invalidations: get(&self.invalidations),
            flushes: get(&self.flushes),
            peephole_rewrites: get(&self.peephole_rewrites),
        }
    }
}
