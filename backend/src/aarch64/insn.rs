//! Classification of already-emitted A64 words.
//!
//! Used by passes that rewrite finished code (peephole, chaining) to
//! recognize what they may and may not touch.

use super::emitter::{NOP, RET};
use super::regs::HostReg;

/// Any instruction that can redirect control flow: branches
/// (immediate, conditional, compare/test-and-branch, register) and BRK.
pub const fn is_control_transfer(w: u32) -> bool {
    is_b_or_bl(w)
        || w & 0xFF00_0010 == 0x5400_0000
        || w & 0x7E00_0000 == 0x3400_0000
        || w & 0x7E00_0000 == 0x3600_0000
        || w & 0xFF9F_FC1F == 0xD61F_0000
        || w & 0xFFE0_001F == 0xD420_0000
}

const fn is_b_or_bl(w: u32) -> bool {
    w & 0x7C00_0000 == 0x1400_0000
}

/// Unconditional immediate `B` (not BL).
pub const fn is_b(w: u32) -> bool {
    w & 0xFC00_0000 == 0x1400_0000
}

/// Byte displacement of a `B`/`BL`.
pub const fn b_disp(w: u32) -> i64 {
    (((w & 0x03FF_FFFF) << 6) as i32 >> 6) as i64 * 4
}

pub const fn is_ret(w: u32) -> bool {
    w == RET
}

pub const fn is_nop(w: u32) -> bool {
    w == NOP
}

/// `MOVZ`: `(sf, rd, imm16, hw)`.
pub const fn as_movz(w: u32) -> Option<(bool, HostReg, u32, u32)> {
    if w & 0x7F80_0000 == 0x5280_0000 {
        Some((w >> 31 != 0, HostReg::from_index(w), (w >> 5) & 0xFFFF, (w >> 21) & 3))
    } else {
        None
    }
}

/// `MOVN`: `(sf, rd, imm16, hw)`.
pub const fn as_movn(w: u32) -> Option<(bool, HostReg, u32, u32)> {
    if w & 0x7F80_0000 == 0x1280_0000 {
        Some((w >> 31 != 0, HostReg::from_index(w), (w >> 5) & 0xFFFF, (w >> 21) & 3))
    } else {
        None
    }
}

/// `MOV Rd, Rm` (ORR shifted register with ZR, no shift): `(sf, rd, rm)`.
pub const fn as_mov_reg(w: u32) -> Option<(bool, HostReg, HostReg)> {
    if w & 0x7FE0_FFE0 == 0x2A00_03E0 {
        Some((w >> 31 != 0, HostReg::from_index(w), HostReg::from_index(w >> 16)))
    } else {
        None
    }
}

/// `ADD Rd, Rn, #imm` (no flags, unshifted): `(sf, rd, rn, imm12)`.
pub const fn as_add_imm(w: u32) -> Option<(bool, HostReg, HostReg, u32)> {
    if w & 0x7FC0_0000 == 0x1100_0000 {
        Some((
            w >> 31 != 0,
            HostReg::from_index(w),
            HostReg::from_index(w >> 5),
            (w >> 10) & 0xFFF,
        ))
    } else {
        None
    }
}

/// Destination register field of a data-processing word.
pub const fn rd(w: u32) -> HostReg {
    HostReg::from_index(w)
}
