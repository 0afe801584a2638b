//! Guest operand access: register views, effective addresses, and
//! sized loads and stores.
//!
//! Scratch register use is fixed so that helpers compose: an address
//! lives in SCRATCH0, a loaded value in SCRATCH1, and SCRATCH2 only
//! carries immediates that do not fit an instruction field.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{SCRATCH0, SCRATCH1, SCRATCH2};
use dbt_backend::{CodeBuffer, HostReg};
use dbt_core::{Insn, MemBase, MemOperand, OpSize, Prefixes, Reg, Segment};

use crate::regmap::host_reg;

/// A memory access `[base + offset]` with `offset` in `-256..256`, so it
/// always fits the unscaled load/store form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub base: HostReg,
    pub offset: i64,
}

/// Resolved location of an r/m operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Place {
    Reg(HostReg),
    Mem(Addr),
}

#[inline]
pub fn is_wide(size: OpSize) -> bool {
    size == OpSize::Qword
}

/// Host register holding the guest register with encoding `idx` at
/// `size`. `None` for AH/CH/DH/BH, which have no host counterpart.
pub fn reg_view(insn: &Insn, idx: u8, size: OpSize) -> Option<HostReg> {
    if size == OpSize::Byte && !insn.has_rex() && (4..8).contains(&idx) {
        return None;
    }
    Some(host_reg(Reg::from_index(idx)))
}

/// The ModR/M `reg` operand.
pub fn reg_operand(insn: &Insn, size: OpSize) -> Option<HostReg> {
    let m = insn.modrm?;
    reg_view(insn, m.reg, size)
}

/// Compute the address of `mem` so it can be accessed as an [`Addr`].
///
/// Uses SCRATCH0 for the address and SCRATCH2 for a large displacement.
/// Address-size overrides and FS/GS-relative operands are not supported.
pub fn gen_address(buf: &mut CodeBuffer, insn: &Insn, mem: &MemOperand) -> Option<Addr> {
    if insn.prefixes.contains(Prefixes::ADDRSIZE)
        || matches!(mem.segment, Some(Segment::Fs | Segment::Gs))
    {
        return None;
    }
    let disp = mem.disp;
    let base = match (mem.base, mem.index) {
        (MemBase::Rip, _) => {
            emit_movi(buf, true, SCRATCH0, insn.next_pc().wrapping_add(disp as u64));
            return Some(Addr {
                base: SCRATCH0,
                offset: 0,
            });
        }
        (MemBase::None, None) => {
            emit_movi(buf, true, SCRATCH0, disp as u64);
            return Some(Addr {
                base: SCRATCH0,
                offset: 0,
            });
        }
        (MemBase::Reg(b), None) => host_reg(b),
        (MemBase::Reg(b), Some((i, scale))) => {
            emit(
                buf,
                encode_addsub_reg(
                    AddSubOp::Add,
                    true,
                    SCRATCH0,
                    host_reg(b),
                    host_reg(i),
                    Shift::Lsl,
                    scale as u32,
                ),
            );
            SCRATCH0
        }
        (MemBase::None, Some((i, scale))) => {
            emit(buf, encode_lsl_imm(true, SCRATCH0, host_reg(i), scale as u32));
            SCRATCH0
        }
    };
    if (-256..256).contains(&disp) {
        Some(Addr { base, offset: disp })
    } else {
        emit_addsub_imm(buf, AddSubOp::Add, true, SCRATCH0, base, disp, SCRATCH2);
        Some(Addr {
            base: SCRATCH0,
            offset: 0,
        })
    }
}

/// Resolve the r/m operand of `insn` at `size`.
pub fn resolve_rm(buf: &mut CodeBuffer, insn: &Insn, size: OpSize) -> Option<Place> {
    let m = insn.modrm?;
    if m.mode == 3 {
        return reg_view(insn, m.rm, size).map(Place::Reg);
    }
    let mem = insn.mem_operand()?;
    gen_address(buf, insn, &mem).map(Place::Mem)
}

/// Zero-extending load of `size` bytes into `rt`.
pub fn gen_load(buf: &mut CodeBuffer, size: OpSize, rt: HostReg, a: Addr) {
    emit_ldst(buf, LdStOp::Ldr, size.log2_bytes(), rt, a.base, a.offset, SCRATCH2);
}

/// Sign-extending load of `size` bytes into the X (`wide`) or W view
/// of `rt`.
pub fn gen_load_sx(buf: &mut CodeBuffer, size: OpSize, wide: bool, rt: HostReg, a: Addr) {
    let op = if wide { LdStOp::LdrSxX } else { LdStOp::LdrSxW };
    emit_ldst(buf, op, size.log2_bytes(), rt, a.base, a.offset, SCRATCH2);
}

pub fn gen_store(buf: &mut CodeBuffer, size: OpSize, rt: HostReg, a: Addr) {
    emit_ldst(buf, LdStOp::Str, size.log2_bytes(), rt, a.base, a.offset, SCRATCH2);
}

/// Write the low `size` bits of `src` into guest register `dst` with
/// x86 semantics: 32-bit writes zero the upper half, 8/16-bit writes
/// keep the untouched bits.
pub fn gen_write_reg(buf: &mut CodeBuffer, size: OpSize, dst: HostReg, src: HostReg) {
    match size {
        OpSize::Qword => {
            if dst != src {
                emit_mov(buf, true, dst, src);
            }
        }
        OpSize::Dword => emit_mov(buf, false, dst, src),
        OpSize::Word | OpSize::Byte => emit(buf, encode_bfi(true, dst, src, 0, size.bits())),
    }
}

/// Current value of `place`: the register itself, or loaded into `tmp`.
pub fn gen_read_place(buf: &mut CodeBuffer, place: Place, size: OpSize, tmp: HostReg) -> HostReg {
    match place {
        Place::Reg(r) => r,
        Place::Mem(a) => {
            gen_load(buf, size, tmp, a);
            tmp
        }
    }
}

/// Store the low `size` bits of `val` into `place`.
pub fn gen_write_place(buf: &mut CodeBuffer, place: Place, size: OpSize, val: HostReg) {
    match place {
        Place::Reg(r) => gen_write_reg(buf, size, r, val),
        Place::Mem(a) => gen_store(buf, size, val, a),
    }
}

/// Register that receives the result of an operation on `place`: the
/// guest register for full-width register operands, SCRATCH1 otherwise
/// (to be written back with [`gen_write_place`]).
pub fn result_reg(place: Place, size: OpSize) -> HostReg {
    match place {
        Place::Reg(r) if size == OpSize::Qword || size == OpSize::Dword => r,
        _ => SCRATCH1,
    }
}

/// Materialize `value` for an operation of `size`, using ZR for zero.
pub fn gen_imm_reg(buf: &mut CodeBuffer, size: OpSize, value: i64, tmp: HostReg) -> HostReg {
    let v = value as u64 & size.mask();
    if v == 0 {
        return HostReg::Zr;
    }
    emit_movi(buf, is_wide(size), tmp, v);
    tmp
}

/// The instruction's immediate, sign-extended to the operation width.
#[inline]
pub fn imm_operand(insn: &Insn) -> i64 {
    insn.imm.sext()
}

/// Commit an operation result computed into `res` back to `place`.
/// A full-width register result computed in place is already final.
pub fn gen_writeback(buf: &mut CodeBuffer, place: Place, size: OpSize, res: HostReg) {
    match place {
        Place::Reg(r) if r == res => {}
        _ => gen_write_place(buf, place, size, res),
    }
}
