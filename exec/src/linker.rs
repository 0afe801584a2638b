//! Block chaining.
//!
//! Linking rewrites the chain site of one exit slot of a block into a
//! direct branch to another block, so execution skips the dispatcher.
//! Link metadata lives in each block's `jmp` lock: the outgoing target
//! per slot and the list of incoming (predecessor, slot) edges. No two
//! `jmp` locks are ever held at once.

use std::sync::{Arc, Weak};

use dbt_backend::{patch_jump, reset_jump, ExecMemError, ExecutableMemory, IcacheFlush, PatchError};
use dbt_core::{ChainSlot, FlagsOut, TranslatedBlock};
use thiserror::Error;

/// Depth of the chain walk in [`chain_reachable`].
const CHAIN_WALK_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("chain from {from:#x} to {to:#x} out of branch range")]
    OutOfRange { from: u64, to: u64 },
    #[error("word {word:#010x} at {addr:#x} is not a chain site")]
    NotChainSite { addr: u64, word: u32 },
    #[error("block {pc:#x} has no {slot:?} exit")]
    NoExitSite { pc: u64, slot: ChainSlot },
    #[error("block {pc:#x} was invalidated")]
    Invalidated { pc: u64 },
    #[error("block {to:#x} reads flags that {from:#x} may not hand over")]
    FlagsLost { from: u64, to: u64 },
    #[error(transparent)]
    Memory(#[from] ExecMemError),
}

fn same_block(w: &Weak<TranslatedBlock>, tb: &Arc<TranslatedBlock>) -> bool {
    std::ptr::eq(w.as_ptr(), Arc::as_ptr(tb))
}

/// Patches chain sites in one executable memory.
pub struct Linker<'a, E: ?Sized, I: ?Sized> {
    mem: &'a E,
    icache: &'a I,
}

impl<'a, E, I> Linker<'a, E, I>
where
    E: ExecutableMemory + ?Sized,
    I: IcacheFlush + ?Sized,
{
    pub fn new(mem: &'a E, icache: &'a I) -> Self {
        Self { mem, icache }
    }

    /// Chain `slot` of `from` directly to `to`.
    ///
    /// On error the site keeps its previous word.
    pub fn link(
        &self,
        from: &Arc<TranslatedBlock>,
        to: &Arc<TranslatedBlock>,
        slot: ChainSlot,
    ) -> Result<(), LinkError> {
        for tb in [from, to] {
            if tb.is_invalid() {
                return Err(LinkError::Invalidated { pc: tb.pc });
            }
        }
        // A pass-through exit forwards flags of an unknown predecessor.
        if to.flags_in && matches!(from.flags_out, FlagsOut::Lost | FlagsOut::PassThrough) {
            return Err(LinkError::FlagsLost {
                from: from.pc,
                to: to.pc,
            });
        }
        let site = from.exit_addr(slot).ok_or(LinkError::NoExitSite { pc: from.pc, slot })?;

        let previous = {
            let jmp = from.jmp.lock();
            jmp.jmp_dest[slot.index()].clone()
        };
        if previous.as_ref().is_some_and(|w| same_block(w, to)) {
            return Ok(());
        }

        patch_jump(self.mem, self.icache, site, to.host.addr()).map_err(|e| match e {
            PatchError::OutOfRange(_) => LinkError::OutOfRange {
                from: site,
                to: to.host.addr(),
            },
            PatchError::NotChainSite { addr, word } => LinkError::NotChainSite { addr, word },
            PatchError::Memory(e) => LinkError::Memory(e),
        })?;

        from.jmp.lock().jmp_dest[slot.index()] = Some(Arc::downgrade(to));
        if let Some(old) = previous.and_then(|w| w.upgrade()) {
            old.jmp.lock().jmp_list.retain(|(w, s)| !(same_block(w, from) && *s == slot));
        }
        to.jmp.lock().jmp_list.push((Arc::downgrade(from), slot));
        log::trace!("chained {:#x}[{slot:?}] -> {:#x}", from.pc, to.pc);
        Ok(())
    }

    /// Restore every chained exit of `from` to `B +4`.
    ///
    /// Returns the number of sites restored.
    pub fn unlink(&self, from: &Arc<TranslatedBlock>) -> Result<usize, LinkError> {
        let mut restored = 0;
        for slot in ChainSlot::ALL {
            let dest = from.jmp.lock().jmp_dest[slot.index()].take();
            let Some(dest) = dest else { continue };
            if let Some(site) = from.exit_addr(slot) {
                self.reset(site)?;
                restored += 1;
            }
            if let Some(to) = dest.upgrade() {
                to.jmp.lock().jmp_list.retain(|(w, s)| !(same_block(w, from) && *s == slot));
            }
        }
        Ok(restored)
    }

    /// Restore every predecessor site that jumps into `to`.
    ///
    /// Returns the number of sites restored.
    pub fn unlink_incoming(&self, to: &Arc<TranslatedBlock>) -> Result<usize, LinkError> {
        let incoming = std::mem::take(&mut to.jmp.lock().jmp_list);
        let mut restored = 0;
        for (pred, slot) in incoming {
            let Some(pred) = pred.upgrade() else { continue };
            let still_linked = {
                let mut jmp = pred.jmp.lock();
                let dest = &mut jmp.jmp_dest[slot.index()];
                if dest.as_ref().is_some_and(|w| same_block(w, to)) {
                    *dest = None;
                    true
                } else {
                    false
                }
            };
            if still_linked {
                if let Some(site) = pred.exit_addr(slot) {
                    self.reset(site)?;
                    restored += 1;
                }
            }
        }
        Ok(restored)
    }

    fn reset(&self, site: u64) -> Result<(), LinkError> {
        reset_jump(self.mem, self.icache, site).map_err(|e| match e {
            PatchError::NotChainSite { addr, word } => LinkError::NotChainSite { addr, word },
            PatchError::Memory(e) => LinkError::Memory(e),
            PatchError::OutOfRange(_) => LinkError::OutOfRange { from: site, to: site + 4 },
        })
    }
}

/// Whether `target` is reachable from `from` through existing chains.
///
/// Chaining `target` to `from` would then close a loop that never
/// returns to the dispatcher.
pub fn chain_reachable(from: &Arc<TranslatedBlock>, target: &Arc<TranslatedBlock>) -> bool {
    fn walk(cur: &Arc<TranslatedBlock>, target: &Arc<TranslatedBlock>, depth: usize) -> bool {
        if Arc::ptr_eq(cur, target) {
            return true;
        }
        // Too deep to tell; treat as reachable.
        if depth == 0 {
            return true;
        }
        let next: Vec<_> = {
            let jmp = cur.jmp.lock();
            jmp.jmp_dest.iter().flatten().filter_map(Weak::upgrade).collect()
        };
        next.iter().any(|n| walk(n, target, depth - 1))
    }
    walk(from, target, CHAIN_WALK_DEPTH)
}
