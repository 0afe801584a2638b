//! Translation environment: cache lookup, block translation and
//! installation, chaining and invalidation.
//!
//! An [`ExecEnv`] owns everything that outlives a single block: the
//! executable code region, the translation cache, the resident block
//! store and the chain links between blocks. Running the installed
//! code is left to the caller; `lookup` and `get_or_translate` hand out
//! host addresses inside the region.

pub mod cache;
pub mod config;
pub mod linker;
pub mod stats;
pub mod tb_store;

pub use cache::{hash_guest_addr, CacheEntry, CacheError, CacheStats, TranslationCache};
pub use config::TranslatorConfig;
pub use linker::{chain_reachable, LinkError, Linker};
pub use stats::TranslationStats;
pub use tb_store::TbStore;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dbt_backend::{CodeBuffer, CodeRegion, ExecMemError, ExecutableMemory, HostIcache, IcacheFlush};
use dbt_core::{ChainSlot, EndReason, TranslatedBlock};
use dbt_disas::aarch64::disas_block;
use dbt_frontend::{translate_block, AssembledBlock, GuestMemory, TranslateError};
use parking_lot::Mutex;
use thiserror::Error;

use stats::{bump, StatCounters};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    CodeRegion(#[from] ExecMemError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Translation state shared by every thread running one guest.
pub struct ExecEnv<M, E = CodeRegion, I = HostIcache> {
    config: TranslatorConfig,
    mem: M,
    code: E,
    icache: I,
    cache: TranslationCache,
    tb_store: TbStore,
    /// Serializes installs, invalidations and every chain patch.
    link_lock: Mutex<()>,
    stats: StatCounters,
}

impl<M: GuestMemory> ExecEnv<M> {
    /// Environment over a fresh mmap'd code region.
    pub fn new(config: TranslatorConfig, mem: M) -> Result<Self, ExecError> {
        let code = CodeRegion::new(config.code_region_size)?;
        Ok(Self::with_parts(config, mem, code, HostIcache))
    }
}

impl<M, E, I> ExecEnv<M, E, I>
where
    M: GuestMemory,
    E: ExecutableMemory,
    I: IcacheFlush,
{
    pub fn with_parts(config: TranslatorConfig, mem: M, code: E, icache: I) -> Self {
        Self {
            cache: TranslationCache::new(config.cache_table_bits, config.max_resident),
            config,
            mem,
            code,
            icache,
            tb_store: TbStore::new(),
            link_lock: Mutex::new(()),
            stats: StatCounters::default(),
        }
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn guest_memory(&self) -> &M {
        &self.mem
    }

    pub fn code_memory(&self) -> &E {
        &self.code
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn tb_store(&self) -> &TbStore {
        &self.tb_store
    }

    pub fn stats(&self) -> TranslationStats {
        self.stats.snapshot()
    }

    pub fn linker(&self) -> Linker<'_, E, I> {
        Linker::new(&self.code, &self.icache)
    }

    /// Host address of the resident translation of `pc`.
    pub fn lookup(&self, pc: u64) -> Option<u64> {
        self.cache.lookup(pc)
    }

    /// Resident block metadata for `pc`.
    pub fn block(&self, pc: u64) -> Option<Arc<TranslatedBlock>> {
        self.tb_store.get(pc)
    }

    /// Host address for `pc`, translating on a cache miss.
    pub fn get_or_translate(&self, pc: u64) -> Result<u64, ExecError> {
        if let Some(host) = self.cache.lookup(pc) {
            return Ok(host);
        }
        Ok(self.translate(pc)?.host.addr())
    }

    /// Translate the block at `pc` and install it, replacing any
    /// resident translation of the same address.
    pub fn translate(&self, pc: u64) -> Result<Arc<TranslatedBlock>, ExecError> {
        let mut buf = CodeBuffer::new(self.config.block_buffer_size);
        let block = translate_block(&self.mem, pc, &self.config.limits, &mut buf, self.config.optimize)
            .inspect_err(|_| bump(&self.stats.overflows, 1))?;
        self.install(block)
    }

    fn install(&self, block: AssembledBlock) -> Result<Arc<TranslatedBlock>, ExecError> {
        let len = block.code.len();
        let host = self.code.alloc_executable(len).inspect_err(|e| {
            bump(&self.stats.overflows, 1);
            log::warn!("no room for block {:#x}: {e}", block.pc);
        })?;
        self.code.write(&host, &block.code)?;
        self.icache.flush(host.addr(), len);

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "block {:#x} -> {:#x}\n{}",
                block.pc,
                host.addr(),
                disas_block(host.addr(), &block.code)
            );
        }

        let mut tb = TranslatedBlock::new(
            block.pc,
            block.guest_size,
            block.icount,
            host,
            block.exits,
            block.end,
            block.exit_kind,
        );
        tb.unsupported = block.unsupported;
        tb.flags_in = block.flags_in;
        tb.flags_out = block.flags_out;
        let tb = Arc::new(tb);

        let _links = self.link_lock.lock();
        let evicted = self.cache.insert(tb.pc, host.addr(), len as u32).inspect_err(|e| {
            bump(&self.stats.overflows, 1);
            log::warn!("block {:#x} not cached: {e}", block.pc);
        })?;
        if let Some(old) = evicted.and_then(|g| self.tb_store.remove(g)) {
            log::debug!("block {:#x} evicted by {:#x}", old.pc, tb.pc);
            self.retire(&old);
        }
        if let Some(old) = self.tb_store.insert(Arc::clone(&tb)) {
            self.retire(&old);
        }

        bump(&self.stats.blocks, 1);
        bump(&self.stats.insns, block.icount as u64);
        bump(&self.stats.unsupported, block.unsupported as u64);
        bump(&self.stats.peephole_rewrites, block.peephole_rewrites as u64);
        if block.end == EndReason::DecodeFault {
            bump(&self.stats.decode_faults, 1);
        }

        if self.config.chain_blocks {
            self.chain_new(&tb);
        }
        Ok(tb)
    }

    /// Link a freshly installed block to resident successors and its
    /// waiting predecessors to it. Caller holds the link lock.
    fn chain_new(&self, tb: &Arc<TranslatedBlock>) {
        for slot in ChainSlot::ALL {
            let Some(exit) = tb.exits[slot.index()] else { continue };
            match self.tb_store.get(exit.target_pc) {
                Some(dst) => self.try_link(tb, &dst, slot),
                None => self.tb_store.add_pending(exit.target_pc, tb, slot),
            }
        }
        for (pred, slot) in self.tb_store.take_pending(tb.pc) {
            if pred.exits[slot.index()].is_some_and(|e| e.target_pc == tb.pc) {
                self.try_link(&pred, tb, slot);
            }
        }
    }

    fn try_link(&self, from: &Arc<TranslatedBlock>, to: &Arc<TranslatedBlock>, slot: ChainSlot) {
        if chain_reachable(to, from) {
            log::trace!("not chaining {:#x} -> {:#x}: cycle", from.pc, to.pc);
            bump(&self.stats.link_failures, 1);
            return;
        }
        match self.linker().link(from, to, slot) {
            Ok(()) => bump(&self.stats.links, 1),
            Err(e) => {
                log::debug!("not chaining {:#x} -> {:#x}: {e}", from.pc, to.pc);
                bump(&self.stats.link_failures, 1);
            }
        }
    }

    /// Mark `tb` invalid and restore every chain site into or out of
    /// it. Predecessors wait for the next translation of its pc.
    /// Caller holds the link lock.
    fn retire(&self, tb: &Arc<TranslatedBlock>) {
        tb.invalid.store(true, Ordering::Release);
        let preds: Vec<_> = tb
            .jmp
            .lock()
            .jmp_list
            .iter()
            .filter_map(|(w, slot)| w.upgrade().map(|p| (p, *slot)))
            .collect();
        let linker = self.linker();
        let restored = linker
            .unlink(tb)
            .and_then(|out| linker.unlink_incoming(tb).map(|inc| out + inc));
        match restored {
            Ok(n) => bump(&self.stats.unlinks, n as u64),
            Err(e) => log::warn!("unlinking block {:#x}: {e}", tb.pc),
        }
        for (pred, slot) in preds {
            if !pred.is_invalid() {
                self.tb_store.add_pending(tb.pc, &pred, slot);
            }
        }
    }

    /// Evict the translation of `pc` and unlink it. Returns false when
    /// nothing was resident.
    pub fn invalidate(&self, pc: u64) -> bool {
        let _links = self.link_lock.lock();
        let cached = self.cache.invalidate(pc);
        let tb = self.tb_store.remove(pc);
        if let Some(tb) = &tb {
            self.retire(tb);
        }
        let hit = cached || tb.is_some();
        if hit {
            bump(&self.stats.invalidations, 1);
            log::debug!("invalidated block {pc:#x}");
        }
        hit
    }

    /// Evict every block overlapping `start..start+len`. Returns the
    /// number of blocks evicted.
    pub fn invalidate_range(&self, start: u64, len: u64) -> usize {
        self.tb_store
            .overlapping(start, len)
            .iter()
            .filter(|tb| self.invalidate(tb.pc))
            .count()
    }

    /// Drop every translation and reclaim the code region.
    pub fn flush(&mut self) {
        self.cache.flush();
        let dropped = self.tb_store.clear();
        self.code.reset();
        bump(&self.stats.flushes, 1);
        log::debug!("flushed {} blocks", dropped.len());
    }
}
