use dbt_backend::exec_mem::DEFAULT_CODE_REGION_SIZE;
use dbt_core::tb::MAX_BLOCK_INSNS;
use dbt_frontend::BlockLimits;

use crate::cache::DEFAULT_TABLE_BITS;

/// Default size of the per-block host code buffer.
pub const DEFAULT_BLOCK_BUFFER_SIZE: usize = 64 * 1024;

/// Tunables of an [`ExecEnv`](crate::ExecEnv).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorConfig {
    pub limits: BlockLimits,
    /// Bytes of host code one block may take before it is cut.
    pub block_buffer_size: usize,
    /// log2 of the translation cache table size.
    pub cache_table_bits: u32,
    /// Bound on resident cache entries.
    pub max_resident: usize,
    pub code_region_size: usize,
    /// Run the peephole pass on each block.
    pub optimize: bool,
    /// Chain direct exits to resident successors on install.
    pub chain_blocks: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            limits: BlockLimits::default(),
            block_buffer_size: DEFAULT_BLOCK_BUFFER_SIZE,
            cache_table_bits: DEFAULT_TABLE_BITS,
            max_resident: 1 << DEFAULT_TABLE_BITS,
            code_region_size: DEFAULT_CODE_REGION_SIZE,
            optimize: true,
            chain_blocks: true,
        }
    }
}

impl TranslatorConfig {
    /// Clamped to `1..=MAX_BLOCK_INSNS`.
    pub fn with_max_insns(mut self, max_insns: u32) -> Self {
        self.limits.max_insns = max_insns.clamp(1, MAX_BLOCK_INSNS);
        self
    }

    pub fn with_max_guest_bytes(mut self, bytes: u32) -> Self {
        self.limits.max_guest_bytes = bytes;
        self
    }

    pub fn with_block_buffer_size(mut self, size: usize) -> Self {
        self.block_buffer_size = size;
        self
    }

    /// Also raises or lowers `max_resident` to the new table size.
    pub fn with_cache_table_bits(mut self, bits: u32) -> Self {
        self.cache_table_bits = bits;
        self.max_resident = 1usize << bits.min(crate::cache::MAX_TABLE_BITS);
        self
    }

    pub fn with_max_resident(mut self, max: usize) -> Self {
        self.max_resident = max;
        self
    }

    pub fn with_code_region_size(mut self, size: usize) -> Self {
        self.code_region_size = size;
        self
    }

    pub fn with_optimize(mut self, on: bool) -> Self {
        self.optimize = on;
        self
    }

    pub fn with_chaining(mut self, on: bool) -> Self {
        self.chain_blocks = on;
        self
    }
}
