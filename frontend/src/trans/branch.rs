//! Control flow: Jcc, JMP, CALL, RET, JRCXZ, LOOPcc, and the
//! flag-consuming CMOVcc and SETcc.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{EXIT_PC, SCRATCH0, SCRATCH1, SCRATCH2};
use dbt_backend::label::{Label, RelocKind};
use dbt_backend::{CodeBuffer, HostReg};
use dbt_core::{ChainSlot, GuestCond, Insn, OpSize, Prefixes};

use super::exit::*;
use super::operand::*;
use crate::cond::{host_cond, CondMapping};
use crate::ctx::{DisasContext, DisasJumpType};
use crate::x86_64::opcodes::*;

const RCX: HostReg = HostReg::X1;
const RSP: HostReg = HostReg::X4;

pub fn trans_control_flow(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let key = opc(insn);
    let ok = match key {
        0x70..=0x7F => trans_jcc(ctx, buf, insn),
        k if (OPC_JCC_long..OPC_JCC_long + 16).contains(&k) => trans_jcc(ctx, buf, insn),
        k if (OPC_CMOVCC..OPC_CMOVCC + 16).contains(&k) => return trans_cmov(ctx, buf, insn),
        k if (OPC_SETCC..OPC_SETCC + 16).contains(&k) => return trans_setcc(ctx, buf, insn),
        OPC_JMP_short | OPC_JMP_long => {
            gen_goto_tb(ctx, buf, ChainSlot::Taken, insn.rel_target());
            true
        }
        OPC_CALL_Jz => {
            if insn.prefixes.contains(Prefixes::OPSIZE) {
                return false;
            }
            gen_push_return(buf, insn.next_pc());
            gen_goto_tb(ctx, buf, ChainSlot::Taken, insn.rel_target());
            true
        }
        OPC_RET => {
            gen_return(ctx, buf);
            true
        }
        OPC_RET_Iw => {
            gen_ret_imm(buf, insn.imm.value);
            gen_return(ctx, buf);
            true
        }
        OPC_GRP5 => trans_indirect(ctx, buf, insn),
        OPC_JRCXZ => {
            let kind = RelocKind::CompareJump {
                sf: !insn.prefixes.contains(Prefixes::ADDRSIZE),
                nonzero: false,
                rt: RCX,
            };
            gen_branch_exit(ctx, buf, kind, insn.rel_target(), insn.next_pc())
        }
        OPC_LOOP | OPC_LOOPE | OPC_LOOPNE => trans_loop(ctx, buf, insn, key),
        _ => false,
    };
    if ok {
        ctx.is_jmp = DisasJumpType::NoReturn;
    }
    ok
}

fn guest_cond(insn: &Insn) -> GuestCond {
    GuestCond::from_nibble(insn.cond_code())
}

fn trans_jcc(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let cond = host_cond(guest_cond(insn), ctx.origin);
    gen_cond_exit(ctx, buf, cond, insn.rel_target(), insn.next_pc())
}

/// Push the return address of a call.
fn gen_push_return(buf: &mut CodeBuffer, ret_pc: u64) {
    emit_movi(buf, true, SCRATCH0, ret_pc);
    emit(buf, encode_ldst_pre(LdStOp::Str, 3, SCRATCH0, RSP, -8));
}

/// `RET imm16`: move the return address up by `imm` bytes and release
/// the slots below it, leaving one pop for the dispatcher.
fn gen_ret_imm(buf: &mut CodeBuffer, imm: u64) {
    let imm = imm & 0xFFFF;
    if imm == 0 {
        return;
    }
    emit(buf, encode_ldst_uimm(LdStOp::Ldr, 3, SCRATCH0, RSP, 0));
    if imm < 256 {
        emit(buf, encode_ldst_pre(LdStOp::Str, 3, SCRATCH0, RSP, imm as i32));
    } else {
        emit_addsub_imm(buf, AddSubOp::Add, true, RSP, RSP, imm as i64, SCRATCH2);
        emit(buf, encode_ldst_uimm(LdStOp::Str, 3, SCRATCH0, RSP, 0));
    }
}

/// `CALL r/m64` and `JMP r/m64`. The target is fetched before the
/// return address is pushed, so `call [rsp]` reads the old top.
fn trans_indirect(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let ext = insn.ext();
    if insn.prefixes.contains(Prefixes::OPSIZE) {
        return false;
    }
    match resolve_rm(buf, insn, OpSize::Qword) {
        Some(Place::Reg(r)) => emit_mov(buf, true, EXIT_PC, r),
        Some(Place::Mem(a)) => gen_load(buf, OpSize::Qword, EXIT_PC, a),
        None => return false,
    }
    if ext == Some(EXT5_CALLN_Ev) {
        gen_push_return(buf, insn.next_pc());
    }
    gen_exit_tb(ctx, buf, EXIT_PC);
    true
}

/// LOOP, LOOPE, LOOPNE: decrement RCX (flags untouched) and branch
/// while it is non-zero and, for the conditional forms, ZF agrees.
fn trans_loop(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn, key: u32) -> bool {
    if insn.prefixes.contains(Prefixes::ADDRSIZE) {
        return false;
    }
    let zf = match key {
        OPC_LOOPE => Some(host_cond(GuestCond::E, ctx.origin)),
        OPC_LOOPNE => Some(host_cond(GuestCond::Ne, ctx.origin)),
        _ => None,
    };
    if zf == Some(CondMapping::Unsupported) {
        return false;
    }
    let (taken, fallthrough) = (insn.rel_target(), insn.next_pc());
    emit(buf, encode_addsub_imm(AddSubOp::Sub, true, RCX, RCX, 1, false));
    let rcx_nonzero = RelocKind::CompareJump {
        sf: true,
        nonzero: true,
        rt: RCX,
    };
    match zf {
        None | Some(CondMapping::Always) => gen_branch_exit(ctx, buf, rcx_nonzero, taken, fallthrough),
        Some(CondMapping::Host(c)) => {
            let mut exit_ft = Label::new();
            let mut exit_taken = Label::new();
            let rcx_zero = RelocKind::CompareJump {
                sf: true,
                nonzero: false,
                rt: RCX,
            };
            if exit_ft.branch(buf, rcx_zero).is_err()
                || exit_taken.branch(buf, RelocKind::CondJump(c)).is_err()
                || exit_ft.bind(buf).is_err()
            {
                return false;
            }
            gen_goto_tb(ctx, buf, ChainSlot::FallThrough, fallthrough);
            if exit_taken.bind(buf).is_err() {
                return false;
            }
            gen_goto_tb(ctx, buf, ChainSlot::Taken, taken);
            true
        }
        Some(_) => {
            gen_goto_tb(ctx, buf, ChainSlot::FallThrough, fallthrough);
            true
        }
    }
}

fn trans_cmov(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let size = insn.op_size();
    if !matches!(size, OpSize::Dword | OpSize::Qword) {
        return false;
    }
    let cond = host_cond(guest_cond(insn), ctx.origin);
    if cond == CondMapping::Unsupported {
        return false;
    }
    let sf = is_wide(size);
    let (Some(dst), Some(place)) = (reg_operand(insn, size), resolve_rm(buf, insn, size)) else {
        return false;
    };
    // The source is read whether or not the move happens.
    let src = gen_read_place(buf, place, size, SCRATCH1);
    match cond {
        CondMapping::Host(c) => emit(buf, encode_csel(CselOp::Csel, sf, dst, src, dst, c)),
        CondMapping::Always => gen_write_reg(buf, size, dst, src),
        // A 32-bit CMOV zero-extends its destination even when false.
        CondMapping::Never if !sf => emit_mov(buf, false, dst, dst),
        _ => {}
    }
    true
}

fn trans_setcc(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let cond = host_cond(guest_cond(insn), ctx.origin);
    let Some(place) = resolve_rm(buf, insn, OpSize::Byte) else {
        return false;
    };
    let val = match cond {
        CondMapping::Host(c) => {
            emit(buf, encode_cset(false, SCRATCH1, c));
            SCRATCH1
        }
        CondMapping::Always => {
            emit_movi(buf, false, SCRATCH1, 1);
            SCRATCH1
        }
        CondMapping::Never => HostReg::Zr,
        CondMapping::Unsupported => return false,
    };
    gen_write_place(buf, place, OpSize::Byte, val);
    true
}
