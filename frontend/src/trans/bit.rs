//! Bit manipulation: scans and counts, bit tests, byte swap, double
//! shifts and CRC32.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{SCRATCH0, SCRATCH1, SCRATCH2};
use dbt_backend::{CodeBuffer, HostCond, HostReg};
use dbt_core::{Insn, OpSize, Prefixes};

use super::operand::*;
use crate::cond::FlagsOrigin;
use crate::ctx::DisasContext;
use crate::regmap::host_reg;
use crate::x86_64::opcodes::*;

const RCX: HostReg = HostReg::X1;

pub fn trans_bit(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let key = opc(insn);
    let rep = insn.prefixes.contains(Prefixes::REP);
    match key {
        OPC_BSF | OPC_BSR => trans_scan(ctx, buf, insn, key == OPC_BSR, rep),
        OPC_POPCNT if rep => trans_popcnt(ctx, buf, insn),
        OPC_BT | OPC_BTS | OPC_BTR | OPC_BTC => {
            let op = match key {
                OPC_BT => BtOp::Bt,
                OPC_BTS => BtOp::Bts,
                OPC_BTR => BtOp::Btr,
                _ => BtOp::Btc,
            };
            trans_bt_reg(ctx, buf, insn, op)
        }
        OPC_GRPBT => {
            let op = match insn.ext() {
                Some(4) => BtOp::Bt,
                Some(5) => BtOp::Bts,
                Some(6) => BtOp::Btr,
                Some(7) => BtOp::Btc,
                _ => return false,
            };
            trans_bt_imm(ctx, buf, insn, op)
        }
        k if (OPC_BSWAP..OPC_BSWAP + 8).contains(&k) => trans_bswap(buf, insn),
        OPC_SHLD_Ib | OPC_SHRD_Ib => trans_dshift_imm(ctx, buf, insn, key == OPC_SHLD_Ib),
        OPC_SHLD_cl | OPC_SHRD_cl => trans_dshift_cl(ctx, buf, insn, key == OPC_SHLD_cl),
        OPC_CRC32_Eb | OPC_CRC32_Ev if insn.prefixes.contains(Prefixes::REPNE) => trans_crc32(buf, insn, key),
        _ => false,
    }
}

/// 32- or 64-bit operand size, the only widths translated here.
fn wide_size(insn: &Insn) -> Option<OpSize> {
    match insn.op_size() {
        s @ (OpSize::Dword | OpSize::Qword) => Some(s),
        _ => None,
    }
}

/// Register destination and (possibly loaded) source of a `Gv, Ev` form.
fn gv_ev(buf: &mut CodeBuffer, insn: &Insn, size: OpSize) -> Option<(HostReg, HostReg)> {
    let dst = reg_operand(insn, size)?;
    let place = resolve_rm(buf, insn, size)?;
    Some((dst, gen_read_place(buf, place, size, SCRATCH1)))
}

/// BSF/BSR, or TZCNT/LZCNT under an F3 prefix.
fn trans_scan(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, reverse: bool, count: bool) -> bool {
    let Some(size) = wide_size(insn) else {
        return false;
    };
    let sf = is_wide(size);
    let Some((dst, src)) = gv_ev(buf, insn, size) else {
        return false;
    };
    if count {
        gen_count_zeros(buf, sf, dst, src, reverse);
        if ctx.flags_live {
            emit(buf, encode_logic_reg(LogicOp::Ands, sf, HostReg::Zr, dst, dst, Shift::Lsl, 0));
        }
    } else if reverse {
        gen_bsr(buf, sf, dst, src);
    } else {
        gen_bsf(buf, sf, dst, src);
    }
    ctx.set_flags(FlagsOrigin::ResultOnly);
    true
}

/// TZCNT (`RBIT`+`CLZ`) or LZCNT (`CLZ`); a zero source counts the
/// full width.
pub fn gen_count_zeros(buf: &mut CodeBuffer, sf: bool, dst: HostReg, src: HostReg, leading: bool) {
    if leading {
        emit(buf, encode_dp1(Dp1Op::Clz, sf, dst, src));
    } else {
        emit(buf, encode_dp1(Dp1Op::Rbit, sf, dst, src));
        emit(buf, encode_dp1(Dp1Op::Clz, sf, dst, dst));
    }
}

/// BSF: index of the lowest set bit; ZF set and destination kept when
/// the source is zero.
pub fn gen_bsf(buf: &mut CodeBuffer, sf: bool, dst: HostReg, src: HostReg) {
    gen_count_zeros(buf, sf, SCRATCH0, src, false);
    emit(buf, encode_addsub_imm(AddSubOp::Subs, sf, HostReg::Zr, src, 0, false));
    emit(buf, encode_csel(CselOp::Csel, sf, dst, dst, SCRATCH0, HostCond::Eq));
}

/// BSR: index of the highest set bit, same zero-source rule as BSF.
pub fn gen_bsr(buf: &mut CodeBuffer, sf: bool, dst: HostReg, src: HostReg) {
    let top = if sf { 63 } else { 31 };
    emit(buf, encode_dp1(Dp1Op::Clz, sf, SCRATCH0, src));
    if let Some(imm) = BitmaskImm::encode(top, sf) {
        emit(buf, encode_logic_imm(LogicOp::Eor, sf, SCRATCH0, SCRATCH0, imm));
    }
    emit(buf, encode_addsub_imm(AddSubOp::Subs, sf, HostReg::Zr, src, 0, false));
    emit(buf, encode_csel(CselOp::Csel, sf, dst, dst, SCRATCH0, HostCond::Eq));
}

fn trans_popcnt(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let Some(size) = wide_size(insn) else {
        return false;
    };
    let sf = is_wide(size);
    let Some((dst, src)) = gv_ev(buf, insn, size) else {
        return false;
    };
    gen_popcount(buf, sf, dst, src);
    if ctx.flags_live {
        emit(buf, encode_logic_reg(LogicOp::Ands, sf, HostReg::Zr, dst, dst, Shift::Lsl, 0));
    }
    ctx.set_flags(FlagsOrigin::Logic);
    true
}

fn logic_imm(buf: &mut CodeBuffer, op: LogicOp, sf: bool, rd: HostReg, rn: HostReg, value: u64) {
    match BitmaskImm::encode(value, sf) {
        Some(imm) => emit(buf, encode_logic_imm(op, sf, rd, rn, imm)),
        None => {
            emit_movi(buf, sf, SCRATCH2, value);
            emit(buf, encode_logic_reg(op, sf, rd, rn, SCRATCH2, Shift::Lsl, 0));
        }
    }
}

/// Population count by SWAR reduction: pair sums, nibble sums, byte
/// sums, then a multiply that accumulates every byte into the top one.
pub fn gen_popcount(buf: &mut CodeBuffer, sf: bool, dst: HostReg, src: HostReg) {
    let (m1, m2, m4, h01) = if sf {
        (
            0x5555_5555_5555_5555u64,
            0x3333_3333_3333_3333u64,
            0x0F0F_0F0F_0F0F_0F0Fu64,
            0x0101_0101_0101_0101u64,
        )
    } else {
        (0x5555_5555, 0x3333_3333, 0x0F0F_0F0F, 0x0101_0101)
    };
    let (x, t) = (SCRATCH0, SCRATCH2);
    emit(buf, encode_lsr_imm(sf, x, src, 1));
    logic_imm(buf, LogicOp::And, sf, x, x, m1);
    emit(buf, encode_addsub_reg(AddSubOp::Sub, sf, x, src, x, Shift::Lsl, 0));
    logic_imm(buf, LogicOp::And, sf, t, x, m2);
    emit(buf, encode_lsr_imm(sf, x, x, 2));
    logic_imm(buf, LogicOp::And, sf, x, x, m2);
    emit(buf, encode_addsub_reg(AddSubOp::Add, sf, x, x, t, Shift::Lsl, 0));
    emit(buf, encode_addsub_reg(AddSubOp::Add, sf, x, x, x, Shift::Lsr, 4));
    logic_imm(buf, LogicOp::And, sf, x, x, m4);
    emit_movi(buf, sf, t, h01);
    emit(buf, encode_mul(sf, x, x, t));
    emit(buf, encode_lsr_imm(sf, dst, x, if sf { 56 } else { 24 }));
}

/// Bit test with an immediate index.
fn trans_bt_imm(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, op: BtOp) -> bool {
    let Some(size) = wide_size(insn) else {
        return false;
    };
    let sf = is_wide(size);
    let Some(place) = resolve_rm(buf, insn, size) else {
        return false;
    };
    let bit = insn.imm.value as u32 & (size.bits() - 1);
    let mask = 1u64 << bit;
    let lhs = gen_read_place(buf, place, size, SCRATCH1);
    if ctx.flags_live {
        logic_imm(buf, LogicOp::Ands, sf, HostReg::Zr, lhs, mask);
    }
    let res = result_reg(place, size);
    match op {
        BtOp::Bt => {}
        BtOp::Bts => logic_imm(buf, LogicOp::Orr, sf, res, lhs, mask),
        BtOp::Btr => logic_imm(buf, LogicOp::And, sf, res, lhs, !mask & size.mask()),
        BtOp::Btc => logic_imm(buf, LogicOp::Eor, sf, res, lhs, mask),
    }
    if op != BtOp::Bt {
        gen_writeback(buf, place, size, res);
    }
    ctx.set_flags(FlagsOrigin::BitTest);
    true
}

/// Bit test with a register index; register destinations only (a
/// memory operand would address a bit string beyond the operand).
fn trans_bt_reg(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, op: BtOp) -> bool {
    let Some(size) = wide_size(insn) else {
        return false;
    };
    let sf = is_wide(size);
    let (Some(dst), Some(idx)) = (insn.rm_reg(), reg_operand(insn, size)) else {
        return false;
    };
    let dst = host_reg(dst);
    gen_bit_mask(buf, sf, SCRATCH0, idx);
    if ctx.flags_live {
        emit(buf, encode_logic_reg(LogicOp::Ands, sf, HostReg::Zr, dst, SCRATCH0, Shift::Lsl, 0));
    }
    let lop = match op {
        BtOp::Bt => None,
        BtOp::Bts => Some(LogicOp::Orr),
        BtOp::Btr => Some(LogicOp::Bic),
        BtOp::Btc => Some(LogicOp::Eor),
    };
    if let Some(lop) = lop {
        emit(buf, encode_logic_reg(lop, sf, dst, dst, SCRATCH0, Shift::Lsl, 0));
    }
    ctx.set_flags(FlagsOrigin::BitTest);
    true
}

/// `rd = 1 << (idx mod width)`
pub fn gen_bit_mask(buf: &mut CodeBuffer, sf: bool, rd: HostReg, idx: HostReg) {
    emit(buf, encode_movw(MoveWideOp::Movz, sf, rd, 1, 0));
    emit(buf, encode_dp2(Dp2Op::Lslv, sf, rd, rd, idx));
}

fn trans_bswap(buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let r = host_reg(insn.opcode_reg());
    match insn.op_size() {
        OpSize::Qword => emit(buf, encode_dp1(Dp1Op::Rev64, true, r, r)),
        OpSize::Dword => emit(buf, encode_dp1(Dp1Op::Rev32, false, r, r)),
        _ => return false,
    }
    true
}

/// Register destination and source of SHLD/SHRD.
fn dshift_operands(insn: &Insn, size: OpSize) -> Option<(HostReg, HostReg)> {
    let dst = host_reg(insn.rm_reg()?);
    let src = reg_operand(insn, size)?;
    Some((dst, src))
}

fn trans_dshift_imm(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, left: bool) -> bool {
    let Some(size) = wide_size(insn) else {
        return false;
    };
    let Some((dst, src)) = dshift_operands(insn, size) else {
        return false;
    };
    let sf = is_wide(size);
    let n = insn.imm.value as u32 & (size.bits() - 1);
    if n == 0 {
        return true;
    }
    gen_double_shift_imm(buf, sf, dst, src, n, left);
    if ctx.flags_live {
        emit(buf, encode_logic_reg(LogicOp::Ands, sf, HostReg::Zr, dst, dst, Shift::Lsl, 0));
    }
    ctx.set_flags(FlagsOrigin::ResultOnly);
    true
}

/// SHLD/SHRD by a constant `n` in `1..width`: one `EXTR`.
pub fn gen_double_shift_imm(buf: &mut CodeBuffer, sf: bool, dst: HostReg, src: HostReg, n: u32, left: bool) {
    let width = if sf { 64 } else { 32 };
    let word = if left {
        encode_extr(sf, dst, dst, src, width - n)
    } else {
        encode_extr(sf, dst, src, dst, n)
    };
    emit(buf, word);
}

fn trans_dshift_cl(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, left: bool) -> bool {
    if ctx.flags_live {
        return false;
    }
    let Some(size) = wide_size(insn) else {
        return false;
    };
    let Some((dst, src)) = dshift_operands(insn, size) else {
        return false;
    };
    gen_double_shift_cl(buf, is_wide(size), dst, src, left);
    ctx.clobber_flags();
    true
}

/// SHLD/SHRD by CL. The count is taken modulo the width; a zero count
/// must leave the destination alone, which the shift-pair does not, so
/// the result is selected on `CL & mask == 0`. Clobbers NZCV.
pub fn gen_double_shift_cl(buf: &mut CodeBuffer, sf: bool, dst: HostReg, src: HostReg, left: bool) {
    let (near, far) = if left {
        (Dp2Op::Lslv, Dp2Op::Lsrv)
    } else {
        (Dp2Op::Lsrv, Dp2Op::Lslv)
    };
    emit(buf, encode_dp2(near, sf, SCRATCH0, dst, RCX));
    emit(buf, encode_addsub_reg(AddSubOp::Sub, false, SCRATCH2, HostReg::Zr, RCX, Shift::Lsl, 0));
    emit(buf, encode_dp2(far, sf, SCRATCH2, src, SCRATCH2));
    emit(buf, encode_logic_reg(LogicOp::Orr, sf, SCRATCH0, SCRATCH0, SCRATCH2, Shift::Lsl, 0));
    logic_imm(buf, LogicOp::Ands, sf, HostReg::Zr, RCX, if sf { 63 } else { 31 });
    emit(buf, encode_csel(CselOp::Csel, sf, dst, dst, SCRATCH0, HostCond::Eq));
}

/// CRC32 (SSE4.2) accumulates with the Castagnoli polynomial, as A64
/// `CRC32C*` does.
fn trans_crc32(buf: &mut CodeBuffer, insn: &Insn, key: u32) -> bool {
    let src_size = if key == OPC_CRC32_Eb { OpSize::Byte } else { insn.op_size() };
    let Some(dst) = reg_operand(insn, OpSize::Dword) else {
        return false;
    };
    let Some(place) = resolve_rm(buf, insn, src_size) else {
        return false;
    };
    let src = gen_read_place(buf, place, src_size, SCRATCH1);
    emit(buf, encode_crc32c(src_size.log2_bytes(), dst, dst, src));
    true
}
