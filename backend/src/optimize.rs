// Peephole pass over a finished block of A64 code.
//
// Single forward scan; every rewrite turns one word into NOP in place,
// so no offset inside the block moves and no branch target changes.

use crate::aarch64::emitter::NOP;
use crate::aarch64::insn::{as_add_imm, as_mov_reg, as_movn, as_movz, is_control_transfer};
use crate::aarch64::HostReg;

/// A word that has no architectural effect.
fn is_redundant(w: u32) -> bool {
    // 64-bit self-move. The 32-bit form zero-extends, so it is kept.
    if let Some((true, rd, rm)) = as_mov_reg(w) {
        return rd == rm && rd != HostReg::Zr;
    }
    // `ADD Xd, Xd, #0`; register 31 is SP here and is left alone.
    if let Some((true, rd, rn, 0)) = as_add_imm(w) {
        return rd == rn && rd != HostReg::Zr;
    }
    false
}

/// `MOVZ Rd, #0` followed by a full overwrite of the same register.
fn is_dead_zeroing(w: u32, next: u32) -> bool {
    let Some((_, rd, 0, _)) = as_movz(w) else {
        return false;
    };
    let overwrite = as_movz(next).or_else(|| as_movn(next));
    matches!(overwrite, Some((_, nd, _, _)) if nd == rd)
}

fn read_word(code: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([code[off], code[off + 1], code[off + 2], code[off + 3]])
}

/// Rewrite redundant words in `code` to NOP. Returns the number of
/// rewritten words. Control transfers are never modified.
pub fn optimize(code: &mut [u8]) -> usize {
    let nwords = code.len() / 4;
    let mut rewritten = 0;

    for i in 0..nwords {
        let off = i * 4;
        let w = read_word(code, off);
        if is_control_transfer(w) || w == NOP {
            continue;
        }
        let next = if i + 1 < nwords {
            Some(read_word(code, off + 4))
        } else {
            None
        };
        let dead = is_redundant(w) || next.is_some_and(|n| is_dead_zeroing(w, n));
        if dead {
            code[off..off + 4].copy_from_slice(&NOP.to_le_bytes());
            rewritten += 1;
        }
    }
    rewritten
}
