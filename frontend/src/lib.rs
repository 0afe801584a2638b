//! x86-64 frontend: guest instruction decoding, classification and
//! translation into AArch64 host code.
//!
//! The pipeline for one block is driven by [`assembler::translate_block`]:
//! decode → classify → flags liveness → per-category handlers → exit
//! stub → optional peephole.

// Opcode constants keep their mnemonic casing (`OPC_JCC_long`) and are
// matched as patterns throughout the handlers.
#![allow(non_upper_case_globals)]

pub mod assembler;
pub mod classify;
pub mod cond;
pub mod ctx;
pub mod dispatch;
pub mod flags;
pub mod regmap;
pub mod trans;
pub mod x86_64;

use thiserror::Error;

pub use assembler::{translate_block, AssembledBlock};
pub use classify::{classify, is_terminator};
pub use cond::{host_cond, CondMapping, FlagsOrigin};
pub use ctx::DisasContext;
pub use dispatch::{dispatch, DispatchOutcome};
pub use x86_64::{decode, DecodeError};

// ---------------------------------------------------------------
// Guest memory
// ---------------------------------------------------------------

/// Read access to guest code.
pub trait GuestMemory {
    /// Readable bytes starting at guest address `addr`, possibly empty.
    ///
    /// The decoder never reads past the returned slice; an instruction
    /// that runs off its end is reported as truncated.
    fn read_guest_bytes(&self, addr: u64) -> &[u8];
}

/// A contiguous guest image mapped at `base`.
#[derive(Debug, Clone, Default)]
pub struct GuestImage {
    pub base: u64,
    pub bytes: Vec<u8>,
}

impl GuestImage {
    pub fn new(base: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            base,
            bytes: bytes.into(),
        }
    }

    /// One past the last mapped guest address.
    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }
}

impl GuestMemory for GuestImage {
    fn read_guest_bytes(&self, addr: u64) -> &[u8] {
        match addr.checked_sub(self.base) {
            Some(off) if off < self.bytes.len() as u64 => &self.bytes[off as usize..],
            _ => &[],
        }
    }
}

impl<M: GuestMemory + ?Sized> GuestMemory for &M {
    fn read_guest_bytes(&self, addr: u64) -> &[u8] {
        (**self).read_guest_bytes(addr)
    }
}

// ---------------------------------------------------------------
// Limits and errors
// ---------------------------------------------------------------

/// Guest-side limits on the size of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLimits {
    /// Maximum guest instructions per block, taken in
    /// `1..=MAX_BLOCK_INSNS`.
    pub max_insns: u32,
    /// Maximum guest bytes per block.
    pub max_guest_bytes: u32,
}

impl Default for BlockLimits {
    fn default() -> Self {
        Self {
            max_insns: dbt_core::tb::DEFAULT_MAX_INSNS,
            max_guest_bytes: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    /// The block buffer cannot hold even one instruction and its exit.
    #[error("block buffer overflow at guest pc {pc:#x} ({capacity} byte buffer)")]
    BufferOverflow { pc: u64, capacity: usize },
}
