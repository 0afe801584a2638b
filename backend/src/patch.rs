//! Rewriting chain sites in installed code.
//!
//! A chain site is the `B` word at the head of a direct exit stub. It
//! starts as `B +4`, falling into the stub that returns to the
//! dispatcher, and is retargeted to the successor block when linked.
//! Every patch is one aligned 32-bit store followed by an i-cache flush
//! of those 4 bytes.

use thiserror::Error;

use crate::aarch64::emitter::{encode_b, BranchRangeError, B_NEXT};
use crate::exec_mem::{ExecMemError, ExecutableMemory};
use crate::icache::IcacheFlush;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    OutOfRange(#[from] BranchRangeError),
    #[error("word {word:#010x} at {addr:#x} is not an unconditional branch")]
    NotChainSite { addr: u64, word: u32 },
    #[error(transparent)]
    Memory(#[from] ExecMemError),
}

/// Whether `word` is an unconditional `B`.
#[inline]
pub const fn is_chain_site(word: u32) -> bool {
    word & 0xFC00_0000 == 0x1400_0000
}

/// Host address a `B` at `site` jumps to.
pub fn branch_target(site: u64, word: u32) -> u64 {
    let imm26 = (word & 0x03FF_FFFF) as i32;
    let words = (imm26 << 6) >> 6;
    site.wrapping_add((words as i64 * 4) as u64)
}

/// Point the chain site at `site` to `target`.
///
/// The displacement is checked before anything is written, so an
/// out-of-range target leaves the site untouched.
pub fn patch_jump<E, I>(mem: &E, icache: &I, site: u64, target: u64) -> Result<(), PatchError>
where
    E: ExecutableMemory + ?Sized,
    I: IcacheFlush + ?Sized,
{
    let word = mem.read_u32(site)?;
    if !is_chain_site(word) {
        return Err(PatchError::NotChainSite { addr: site, word });
    }
    let new = encode_b(target.wrapping_sub(site) as i64)?;
    mem.patch_u32(site, new)?;
    icache.flush(site, 4);
    Ok(())
}

/// Restore the chain site at `site` to `B +4`.
pub fn reset_jump<E, I>(mem: &E, icache: &I, site: u64) -> Result<(), PatchError>
where
    E: ExecutableMemory + ?Sized,
    I: IcacheFlush + ?Sized,
{
    let word = mem.read_u32(site)?;
    if !is_chain_site(word) {
        return Err(PatchError::NotChainSite { addr: site, word });
    }
    if word != B_NEXT {
        mem.patch_u32(site, B_NEXT)?;
        icache.flush(site, 4);
    }
    Ok(())
}
