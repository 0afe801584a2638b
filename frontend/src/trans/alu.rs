//! Integer arithmetic: ADD/SUB/ADC/SBB/CMP, logic and TEST, group 3
//! (NOT/NEG/MUL/IMUL/DIV/IDIV), INC/DEC, shifts and rotates, IMUL.
//!
//! 32- and 64-bit operations map onto the W and X forms directly.
//! Narrower operations are computed in a 32-bit scratch register; when
//! their flags are live the operands are shifted to the top of the
//! register first so the host NZCV reflects the narrow width.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{FLAGS_TMP, SCRATCH0, SCRATCH1, SCRATCH2};
use dbt_backend::{CodeBuffer, HostReg};
use dbt_core::{Insn, OpSize};

use super::exit::gen_flip_carry;
use super::operand::*;
use crate::cond::FlagsOrigin;
use crate::ctx::DisasContext;
use crate::x86_64::opcodes::*;

/// Two-operand ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alu {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
    Test,
}

impl Alu {
    fn from_arith(op: ArithOp) -> Alu {
        match op {
            ArithOp::Add => Alu::Add,
            ArithOp::Or => Alu::Or,
            ArithOp::Adc => Alu::Adc,
            ArithOp::Sbb => Alu::Sbb,
            ArithOp::And => Alu::And,
            ArithOp::Sub => Alu::Sub,
            ArithOp::Xor => Alu::Xor,
            ArithOp::Cmp => Alu::Cmp,
        }
    }

    /// CMP and TEST only produce flags.
    fn discards_result(self) -> bool {
        matches!(self, Alu::Cmp | Alu::Test)
    }

    fn origin(self) -> FlagsOrigin {
        match self {
            Alu::Add | Alu::Adc => FlagsOrigin::Add,
            Alu::Sub | Alu::Sbb | Alu::Cmp => FlagsOrigin::Sub,
            Alu::Or | Alu::And | Alu::Xor | Alu::Test => FlagsOrigin::Logic,
        }
    }
}

/// Second operand of an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rhs {
    Reg(HostReg),
    Imm(i64),
}

fn rhs_reg(buf: &mut CodeBuffer, size: OpSize, rhs: Rhs, tmp: HostReg) -> HostReg {
    match rhs {
        Rhs::Reg(r) => r,
        Rhs::Imm(v) => gen_imm_reg(buf, size, v, tmp),
    }
}

#[inline]
fn byte_or(insn: &Insn, byte_form: bool) -> OpSize {
    if byte_form {
        OpSize::Byte
    } else {
        insn.op_size()
    }
}

/// `TST rd, rd`
#[inline]
fn emit_test_self(buf: &mut CodeBuffer, sf: bool, rd: HostReg) {
    emit(buf, encode_logic_reg(LogicOp::Ands, sf, HostReg::Zr, rd, rd, Shift::Lsl, 0));
}

/// Set Z and N from the low `size` bits of `val` (with C and V clear).
fn emit_test_narrow(buf: &mut CodeBuffer, size: OpSize, val: HostReg) {
    emit(buf, encode_lsl_imm(false, SCRATCH2, val, 32 - size.bits()));
    emit_test_self(buf, false, SCRATCH2);
}

pub fn trans_arith(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let key = opc(insn);
    let ext = insn.ext().unwrap_or(0);
    match key {
        0x00..=0x3D => trans_alu_row(ctx, buf, insn, key),
        OPC_ARITH_EbIb | OPC_ARITH_EvIz | OPC_ARITH_EvIb => {
            let size = byte_or(insn, key == OPC_ARITH_EbIb);
            let Some(place) = resolve_rm(buf, insn, size) else {
                return false;
            };
            let op = Alu::from_arith(ArithOp::from_ext(ext));
            gen_alu(ctx, buf, op, size, place, Rhs::Imm(imm_operand(insn)))
        }
        OPC_TESTB | OPC_TESTL => {
            let size = byte_or(insn, key == OPC_TESTB);
            let Some(place) = resolve_rm(buf, insn, size) else {
                return false;
            };
            let Some(r) = reg_operand(insn, size) else {
                return false;
            };
            gen_alu(ctx, buf, Alu::Test, size, place, Rhs::Reg(r))
        }
        OPC_TESTB_AL | OPC_TESTL_EAX => {
            let size = byte_or(insn, key == OPC_TESTB_AL);
            let place = Place::Reg(HostReg::X0);
            gen_alu(ctx, buf, Alu::Test, size, place, Rhs::Imm(imm_operand(insn)))
        }
        OPC_GRP3_Eb | OPC_GRP3_Ev => trans_grp3(ctx, buf, insn, byte_or(insn, key == OPC_GRP3_Eb)),
        OPC_GRP4 | OPC_GRP5 => {
            let size = byte_or(insn, key == OPC_GRP4);
            let Some(place) = resolve_rm(buf, insn, size) else {
                return false;
            };
            gen_incdec(ctx, buf, size, place, ext == EXT5_DEC)
        }
        OPC_SHIFTB_Ib | OPC_SHIFT_Ib | OPC_SHIFTB_1 | OPC_SHIFT_1 | OPC_SHIFTB_cl | OPC_SHIFT_cl => {
            let size = byte_or(insn, key & 1 == 0);
            let Some(place) = resolve_rm(buf, insn, size) else {
                return false;
            };
            let op = ShiftOp::from_ext(ext);
            match key {
                OPC_SHIFTB_Ib | OPC_SHIFT_Ib => {
                    gen_shift_imm(ctx, buf, op, size, place, insn.imm.value as u8)
                }
                OPC_SHIFTB_1 | OPC_SHIFT_1 => gen_shift_imm(ctx, buf, op, size, place, 1),
                _ => gen_shift_cl(ctx, buf, op, size, place),
            }
        }
        OPC_IMUL_GvEv | OPC_IMUL_GvEvIz | OPC_IMUL_GvEvIb => trans_imul(ctx, buf, insn, key),
        _ => false,
    }
}

/// The `00..3D` block: eight operations in six operand forms.
fn trans_alu_row(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, key: u32) -> bool {
    let op = Alu::from_arith(ArithOp::from_ext((key >> 3) as u8));
    let form = key & 7;
    let size = byte_or(insn, form & 1 == 0);
    match form {
        0 | 1 => {
            let Some(place) = resolve_rm(buf, insn, size) else {
                return false;
            };
            let Some(r) = reg_operand(insn, size) else {
                return false;
            };
            gen_alu(ctx, buf, op, size, place, Rhs::Reg(r))
        }
        2 | 3 => {
            let Some(dst) = reg_operand(insn, size) else {
                return false;
            };
            let src = match resolve_rm(buf, insn, size) {
                Some(Place::Reg(r)) => r,
                Some(Place::Mem(a)) => {
                    gen_load(buf, size, SCRATCH1, a);
                    SCRATCH1
                }
                None => return false,
            };
            gen_alu(ctx, buf, op, size, Place::Reg(dst), Rhs::Reg(src))
        }
        4 | 5 => gen_alu(
            ctx,
            buf,
            op,
            size,
            Place::Reg(HostReg::X0),
            Rhs::Imm(imm_operand(insn)),
        ),
        _ => false,
    }
}

fn gen_alu(ctx: &mut DisasContext, buf: &mut CodeBuffer, op: Alu, size: OpSize, place: Place, rhs: Rhs) -> bool {
    let ok = match size {
        OpSize::Dword | OpSize::Qword => gen_alu_wide(ctx, buf, op, size, place, rhs),
        OpSize::Byte | OpSize::Word => gen_alu_narrow(ctx, buf, op, size, place, rhs),
    };
    if ok {
        ctx.set_flags(op.origin());
    }
    ok
}

fn gen_alu_wide(ctx: &DisasContext, buf: &mut CodeBuffer, op: Alu, size: OpSize, place: Place, rhs: Rhs) -> bool {
    let sf = is_wide(size);
    let live = ctx.flags_live;
    if op.discards_result() && !live {
        return true;
    }
    let lhs = gen_read_place(buf, place, size, SCRATCH1);
    let res = if op.discards_result() {
        HostReg::Zr
    } else {
        result_reg(place, size)
    };

    match op {
        Alu::Add | Alu::Sub | Alu::Cmp => {
            let base = if op == Alu::Add { AddSubOp::Add } else { AddSubOp::Sub };
            let aop = base.with_flags(live);
            match rhs {
                Rhs::Imm(v) => emit_addsub_imm(buf, aop, sf, res, lhs, v, SCRATCH2),
                Rhs::Reg(r) => emit(buf, encode_addsub_reg(aop, sf, res, lhs, r, Shift::Lsl, 0)),
            }
        }
        Alu::Adc | Alu::Sbb => {
            // The host carry must mirror CF (ADC) or its inverse (SBB).
            let flip = match (op, ctx.origin) {
                (Alu::Adc, FlagsOrigin::Add | FlagsOrigin::Logic) => false,
                (Alu::Adc, FlagsOrigin::Sub) => true,
                (_, FlagsOrigin::Sub) => false,
                (_, FlagsOrigin::Add | FlagsOrigin::Logic) => true,
                _ => return false,
            };
            if flip {
                gen_flip_carry(buf);
            }
            let rm = rhs_reg(buf, size, rhs, SCRATCH2);
            let aop = match (op, live) {
                (Alu::Adc, false) => AdcOp::Adc,
                (Alu::Adc, true) => AdcOp::Adcs,
                (_, false) => AdcOp::Sbc,
                (_, true) => AdcOp::Sbcs,
            };
            emit(buf, encode_adc(aop, sf, res, lhs, rm));
        }
        Alu::And | Alu::Or | Alu::Xor | Alu::Test => {
            let lop = match op {
                Alu::Or => LogicOp::Orr,
                Alu::Xor => LogicOp::Eor,
                _ if live => LogicOp::Ands,
                _ => LogicOp::And,
            };
            let bitmask = match rhs {
                Rhs::Imm(v) => BitmaskImm::encode(v as u64 & size.mask(), sf),
                Rhs::Reg(_) => None,
            };
            match bitmask {
                Some(imm) => emit(buf, encode_logic_imm(lop, sf, res, lhs, imm)),
                None => {
                    let rm = rhs_reg(buf, size, rhs, SCRATCH2);
                    emit(buf, encode_logic_reg(lop, sf, res, lhs, rm, Shift::Lsl, 0));
                }
            }
            if live && matches!(op, Alu::Or | Alu::Xor) {
                emit_test_self(buf, sf, res);
            }
        }
    }

    if !op.discards_result() {
        gen_writeback(buf, place, size, res);
    }
    true
}

fn gen_alu_narrow(ctx: &DisasContext, buf: &mut CodeBuffer, op: Alu, size: OpSize, place: Place, rhs: Rhs) -> bool {
    let live = ctx.flags_live;
    if matches!(op, Alu::Adc | Alu::Sbb) {
        return false;
    }
    if op.discards_result() && !live {
        return true;
    }
    let top = 32 - size.bits();
    let lhs = gen_read_place(buf, place, size, SCRATCH1);

    match op {
        Alu::Add | Alu::Sub | Alu::Cmp if live => {
            emit(buf, encode_lsl_imm(false, SCRATCH2, lhs, top));
            let rm = rhs_reg(buf, size, rhs, SCRATCH1);
            let aop = if op == Alu::Add { AddSubOp::Adds } else { AddSubOp::Subs };
            let rd = if op == Alu::Cmp { HostReg::Zr } else { SCRATCH2 };
            emit(buf, encode_addsub_reg(aop, false, rd, SCRATCH2, rm, Shift::Lsl, top));
            if op != Alu::Cmp {
                emit(buf, encode_lsr_imm(false, SCRATCH1, SCRATCH2, top));
                gen_write_place(buf, place, size, SCRATCH1);
            }
        }
        Alu::Add | Alu::Sub => {
            let rm = rhs_reg(buf, size, rhs, SCRATCH2);
            let aop = if op == Alu::Add { AddSubOp::Add } else { AddSubOp::Sub };
            emit(buf, encode_addsub_reg(aop, false, SCRATCH1, lhs, rm, Shift::Lsl, 0));
            gen_write_place(buf, place, size, SCRATCH1);
        }
        _ => {
            let lop = match op {
                Alu::Or => LogicOp::Orr,
                Alu::Xor => LogicOp::Eor,
                _ => LogicOp::And,
            };
            let rm = rhs_reg(buf, size, rhs, SCRATCH2);
            emit(buf, encode_logic_reg(lop, false, SCRATCH1, lhs, rm, Shift::Lsl, 0));
            if live {
                emit_test_narrow(buf, size, SCRATCH1);
            }
            if op != Alu::Test {
                gen_write_place(buf, place, size, SCRATCH1);
            }
        }
    }
    true
}

// -- INC / DEC --

/// INC and DEC keep CF. When their flags are live and the incoming
/// carry is known, the host carry is saved around the flag-setting
/// form and put back afterwards.
fn gen_incdec(ctx: &mut DisasContext, buf: &mut CodeBuffer, size: OpSize, place: Place, dec: bool) -> bool {
    let live = ctx.flags_live;
    let base = if dec { AddSubOp::Sub } else { AddSubOp::Add };
    let keep_carry = live && matches!(ctx.origin, FlagsOrigin::Sub | FlagsOrigin::Add | FlagsOrigin::Logic);
    if keep_carry {
        emit(buf, encode_mrs_nzcv(FLAGS_TMP));
    }
    let lhs = gen_read_place(buf, place, size, SCRATCH1);
    match size {
        OpSize::Dword | OpSize::Qword => {
            let res = result_reg(place, size);
            emit(
                buf,
                encode_addsub_imm(base.with_flags(live), is_wide(size), res, lhs, 1, false),
            );
            gen_writeback(buf, place, size, res);
        }
        OpSize::Byte | OpSize::Word if live => {
            let top = 32 - size.bits();
            emit(buf, encode_lsl_imm(false, SCRATCH2, lhs, top));
            emit_movi(buf, false, SCRATCH1, 1 << top);
            emit(
                buf,
                encode_addsub_reg(base.with_flags(true), false, SCRATCH2, SCRATCH2, SCRATCH1, Shift::Lsl, 0),
            );
            emit(buf, encode_lsr_imm(false, SCRATCH1, SCRATCH2, top));
            gen_write_place(buf, place, size, SCRATCH1);
        }
        OpSize::Byte | OpSize::Word => {
            emit(buf, encode_addsub_imm(base, false, SCRATCH1, lhs, 1, false));
            gen_write_place(buf, place, size, SCRATCH1);
        }
    }
    if keep_carry {
        emit(buf, encode_mrs_nzcv(SCRATCH2));
        emit(buf, encode_lsr_imm(true, FLAGS_TMP, FLAGS_TMP, NZCV_C_BIT));
        emit(buf, encode_bfi(true, SCRATCH2, FLAGS_TMP, NZCV_C_BIT, 1));
        emit(buf, encode_msr_nzcv(SCRATCH2));
        // The restored carry keeps the incoming convention.
        ctx.set_flags(match ctx.origin {
            FlagsOrigin::Sub => FlagsOrigin::Sub,
            _ => FlagsOrigin::Add,
        });
    } else {
        ctx.set_flags(FlagsOrigin::IncDec);
    }
    true
}

// -- Group 3 --

fn trans_grp3(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, size: OpSize) -> bool {
    let op = Grp3Op::from_ext(insn.ext().unwrap_or(0));
    let Some(place) = resolve_rm(buf, insn, size) else {
        return false;
    };
    match op {
        Grp3Op::Test | Grp3Op::Test1 => {
            gen_alu(ctx, buf, Alu::Test, size, place, Rhs::Imm(imm_operand(insn)))
        }
        Grp3Op::Not => {
            let sf = is_wide(size);
            let lhs = gen_read_place(buf, place, size, SCRATCH1);
            let res = result_reg(place, size);
            emit(buf, encode_logic_reg(LogicOp::Orn, sf, res, HostReg::Zr, lhs, Shift::Lsl, 0));
            gen_writeback(buf, place, size, res);
            true
        }
        Grp3Op::Neg => gen_neg(ctx, buf, size, place),
        Grp3Op::Mul | Grp3Op::Imul => gen_mul_wide(ctx, buf, size, place, op == Grp3Op::Imul),
        Grp3Op::Div | Grp3Op::Idiv => gen_div(ctx, buf, size, place, op == Grp3Op::Idiv),
    }
}

fn gen_neg(ctx: &mut DisasContext, buf: &mut CodeBuffer, size: OpSize, place: Place) -> bool {
    let live = ctx.flags_live;
    let lhs = gen_read_place(buf, place, size, SCRATCH1);
    match size {
        OpSize::Dword | OpSize::Qword => {
            let res = result_reg(place, size);
            let op = AddSubOp::Sub.with_flags(live);
            emit(buf, encode_addsub_reg(op, is_wide(size), res, HostReg::Zr, lhs, Shift::Lsl, 0));
            gen_writeback(buf, place, size, res);
        }
        OpSize::Byte | OpSize::Word if live => {
            let top = 32 - size.bits();
            emit(
                buf,
                encode_addsub_reg(AddSubOp::Subs, false, SCRATCH2, HostReg::Zr, lhs, Shift::Lsl, top),
            );
            emit(buf, encode_lsr_imm(false, SCRATCH1, SCRATCH2, top));
            gen_write_place(buf, place, size, SCRATCH1);
        }
        OpSize::Byte | OpSize::Word => {
            emit(
                buf,
                encode_addsub_reg(AddSubOp::Sub, false, SCRATCH1, HostReg::Zr, lhs, Shift::Lsl, 0),
            );
            gen_write_place(buf, place, size, SCRATCH1);
        }
    }
    ctx.set_flags(FlagsOrigin::Sub);
    true
}

/// One-operand MUL/IMUL: `rDX:rAX = rAX * src`.
fn gen_mul_wide(ctx: &mut DisasContext, buf: &mut CodeBuffer, size: OpSize, place: Place, signed: bool) -> bool {
    let src = gen_read_place(buf, place, size, SCRATCH1);
    let (rax, rdx) = (HostReg::X0, HostReg::X2);
    match size {
        OpSize::Qword => {
            let hi = if signed { Dp3Op::Smulh } else { Dp3Op::Umulh };
            emit(buf, encode_dp3(hi, true, SCRATCH0, rax, src, HostReg::Zr));
            emit(buf, encode_mul(true, rax, rax, src));
            emit_mov(buf, true, rdx, SCRATCH0);
        }
        OpSize::Dword => {
            let op = if signed { Dp3Op::Smaddl } else { Dp3Op::Umaddl };
            emit(buf, encode_dp3(op, true, SCRATCH0, rax, src, HostReg::Zr));
            emit_mov(buf, false, rax, SCRATCH0);
            emit(buf, encode_lsr_imm(true, rdx, SCRATCH0, 32));
        }
        OpSize::Byte | OpSize::Word => return false,
    }
    ctx.clobber_flags();
    true
}

/// 32-bit DIV/IDIV: `EAX = EDX:EAX / src`, `EDX = EDX:EAX % src`.
///
/// A zero divisor yields a zero quotient instead of raising #DE.
fn gen_div(ctx: &mut DisasContext, buf: &mut CodeBuffer, size: OpSize, place: Place, signed: bool) -> bool {
    if size != OpSize::Dword {
        return false;
    }
    let (eax, edx) = (HostReg::X0, HostReg::X2);
    let src = gen_read_place(buf, place, size, SCRATCH1);
    if signed {
        emit(buf, encode_sbfx(true, SCRATCH1, src, 0, 32));
    } else if src != SCRATCH1 {
        emit_mov(buf, false, SCRATCH1, src);
    }
    emit(buf, encode_lsl_imm(true, SCRATCH0, edx, 32));
    emit(buf, encode_bfi(true, SCRATCH0, eax, 0, 32));
    let op = if signed { Dp2Op::Sdiv } else { Dp2Op::Udiv };
    emit(buf, encode_dp2(op, true, eax, SCRATCH0, SCRATCH1));
    emit(buf, encode_dp3(Dp3Op::Msub, true, edx, eax, SCRATCH1, SCRATCH0));
    emit_mov(buf, false, eax, eax);
    emit_mov(buf, false, edx, edx);
    ctx.clobber_flags();
    true
}

// -- Shifts and rotates --

fn gen_shift_imm(
    ctx: &mut DisasContext,
    buf: &mut CodeBuffer,
    op: ShiftOp,
    size: OpSize,
    place: Place,
    count: u8,
) -> bool {
    let mask = if is_wide(size) { 63 } else { 31 };
    let n = (count & mask) as u32;
    if n == 0 {
        return true;
    }
    let rotate = matches!(op, ShiftOp::Rol | ShiftOp::Ror);
    let wide = matches!(size, OpSize::Dword | OpSize::Qword);
    if matches!(op, ShiftOp::Rcl | ShiftOp::Rcr) || (rotate && !wide) {
        return false;
    }
    let live = ctx.flags_live;
    let lhs = gen_read_place(buf, place, size, SCRATCH1);

    if wide {
        let sf = is_wide(size);
        let bits = size.bits();
        let res = result_reg(place, size);
        let n = n % bits;
        let word = match op {
            ShiftOp::Rol => encode_extr(sf, res, lhs, lhs, (bits - n) % bits),
            ShiftOp::Ror => encode_extr(sf, res, lhs, lhs, n),
            ShiftOp::Shl | ShiftOp::Sal => encode_lsl_imm(sf, res, lhs, n),
            ShiftOp::Shr => encode_lsr_imm(sf, res, lhs, n),
            _ => encode_asr_imm(sf, res, lhs, n),
        };
        emit(buf, word);
        if live && !rotate {
            emit_test_self(buf, sf, res);
        }
        gen_writeback(buf, place, size, res);
    } else {
        let bits = size.bits();
        match op {
            ShiftOp::Shl | ShiftOp::Sal => emit(buf, encode_lsl_imm(false, SCRATCH1, lhs, n)),
            ShiftOp::Shr => {
                emit(buf, encode_ubfx(false, SCRATCH1, lhs, 0, bits));
                emit(buf, encode_lsr_imm(false, SCRATCH1, SCRATCH1, n));
            }
            _ => {
                emit(buf, encode_sbfx(false, SCRATCH1, lhs, 0, bits));
                emit(buf, encode_asr_imm(false, SCRATCH1, SCRATCH1, n));
            }
        }
        if live {
            emit_test_narrow(buf, size, SCRATCH1);
        }
        gen_write_place(buf, place, size, SCRATCH1);
    }

    if rotate {
        ctx.keep_result_flags();
    } else {
        ctx.set_flags(FlagsOrigin::ResultOnly);
    }
    true
}

/// Shift or rotate by CL. A zero count leaves the guest flags alone,
/// which no host sequence here reproduces, so shifts with live flags
/// are refused.
fn gen_shift_cl(ctx: &mut DisasContext, buf: &mut CodeBuffer, op: ShiftOp, size: OpSize, place: Place) -> bool {
    let rotate = matches!(op, ShiftOp::Rol | ShiftOp::Ror);
    if !matches!(size, OpSize::Dword | OpSize::Qword)
        || matches!(op, ShiftOp::Rcl | ShiftOp::Rcr)
        || (ctx.flags_live && !rotate)
    {
        return false;
    }
    let sf = is_wide(size);
    let rcx = HostReg::X1;
    let lhs = gen_read_place(buf, place, size, SCRATCH1);
    let res = result_reg(place, size);
    let word = match op {
        ShiftOp::Rol => {
            emit(buf, encode_addsub_reg(AddSubOp::Sub, false, SCRATCH2, HostReg::Zr, rcx, Shift::Lsl, 0));
            encode_dp2(Dp2Op::Rorv, sf, res, lhs, SCRATCH2)
        }
        ShiftOp::Ror => encode_dp2(Dp2Op::Rorv, sf, res, lhs, rcx),
        ShiftOp::Shl | ShiftOp::Sal => encode_dp2(Dp2Op::Lslv, sf, res, lhs, rcx),
        ShiftOp::Shr => encode_dp2(Dp2Op::Lsrv, sf, res, lhs, rcx),
        _ => encode_dp2(Dp2Op::Asrv, sf, res, lhs, rcx),
    };
    emit(buf, word);
    gen_writeback(buf, place, size, res);
    if rotate {
        ctx.keep_result_flags();
    } else {
        ctx.clobber_flags();
    }
    true
}

// -- IMUL --

/// Two- and three-operand IMUL, truncating to the operand size.
fn trans_imul(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, key: u32) -> bool {
    let size = insn.op_size();
    if !matches!(size, OpSize::Dword | OpSize::Qword) {
        return false;
    }
    let sf = is_wide(size);
    let Some(dst) = reg_operand(insn, size) else {
        return false;
    };
    let Some(place) = resolve_rm(buf, insn, size) else {
        return false;
    };
    let src = gen_read_place(buf, place, size, SCRATCH1);
    let rhs = if key == OPC_IMUL_GvEv {
        dst
    } else {
        gen_imm_reg(buf, size, imm_operand(insn), SCRATCH2)
    };
    emit(buf, encode_mul(sf, dst, src, rhs));
    ctx.clobber_flags();
    true
}
