//! String instructions, with the direction flag assumed clear.
//!
//! A REP-prefixed instruction becomes an in-block loop:
//!
//! ```text
//! top:  CBZ   X1, done
//!       <one element>
//!       SUB   X1, X1, #1
//!       B.NE  done          ; REPE only (B.EQ for REPNE)
//!       B     top
//! done:
//! ```

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{SCRATCH0, SCRATCH1};
use dbt_backend::label::{Label, RelocKind};
use dbt_backend::{CodeBuffer, HostCond, HostReg};
use dbt_core::{Insn, OpSize, Prefixes, Segment};

use super::operand::*;
use crate::cond::FlagsOrigin;
use crate::ctx::DisasContext;
use crate::x86_64::opcodes::*;

const RAX: HostReg = HostReg::X0;
const RCX: HostReg = HostReg::X1;
const RSI: HostReg = HostReg::X6;
const RDI: HostReg = HostReg::X7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrOp {
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
}

impl StrOp {
    fn compares(self) -> bool {
        matches!(self, StrOp::Cmps | StrOp::Scas)
    }
}

/// Repeat prefix of a string instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rep {
    None,
    /// REP, or REPE for compares.
    Rep,
    /// REPNE; same as REP for non-compares.
    Repne,
}

pub fn trans_string(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let key = opc(insn);
    let op = match key {
        OPC_MOVSB | OPC_MOVS => StrOp::Movs,
        OPC_CMPSB | OPC_CMPS => StrOp::Cmps,
        OPC_STOSB | OPC_STOS => StrOp::Stos,
        OPC_LODSB | OPC_LODS => StrOp::Lods,
        OPC_SCASB | OPC_SCAS => StrOp::Scas,
        _ => return false,
    };
    // Only RSI may be segment-overridden, and only the flat segments
    // are supported.
    if insn.prefixes.contains(Prefixes::ADDRSIZE) || matches!(insn.segment(), Some(Segment::Fs | Segment::Gs)) {
        return false;
    }
    let size = if key & 1 == 0 { OpSize::Byte } else { insn.op_size() };
    let rep = if insn.prefixes.contains(Prefixes::REPNE) {
        Rep::Repne
    } else if insn.prefixes.contains(Prefixes::REP) {
        Rep::Rep
    } else {
        Rep::None
    };

    if rep == Rep::None {
        gen_string_element(buf, op, size);
    } else if !gen_rep_loop(buf, op, size, rep) {
        return false;
    }

    if op.compares() {
        // With a zero count the flags are left as they were.
        match (rep, ctx.origin) {
            (Rep::None, _) => ctx.set_flags(FlagsOrigin::Sub),
            (_, FlagsOrigin::Sub) => {}
            _ => ctx.clobber_flags(),
        }
    }
    true
}

fn gen_rep_loop(buf: &mut CodeBuffer, op: StrOp, size: OpSize, rep: Rep) -> bool {
    let mut top = Label::new();
    let mut done = Label::new();
    let rcx_zero = RelocKind::CompareJump {
        sf: true,
        nonzero: false,
        rt: RCX,
    };
    if top.bind(buf).is_err() || done.branch(buf, rcx_zero).is_err() {
        return false;
    }
    gen_string_element(buf, op, size);
    emit(buf, encode_addsub_imm(AddSubOp::Sub, true, RCX, RCX, 1, false));
    if op.compares() {
        let stop = if rep == Rep::Repne { HostCond::Eq } else { HostCond::Ne };
        if done.branch(buf, RelocKind::CondJump(stop)).is_err() {
            return false;
        }
    }
    top.branch(buf, RelocKind::Jump).is_ok() && done.bind(buf).is_ok()
}

/// One iteration: access, pointer update and (for compares) flags.
fn gen_string_element(buf: &mut CodeBuffer, op: StrOp, size: OpSize) {
    let log2 = size.log2_bytes();
    let step = size.bytes() as i32;
    match op {
        StrOp::Movs => {
            emit(buf, encode_ldst_post(LdStOp::Ldr, log2, SCRATCH1, RSI, step));
            emit(buf, encode_ldst_post(LdStOp::Str, log2, SCRATCH1, RDI, step));
        }
        StrOp::Stos => emit(buf, encode_ldst_post(LdStOp::Str, log2, RAX, RDI, step)),
        StrOp::Lods => match size {
            OpSize::Dword | OpSize::Qword => emit(buf, encode_ldst_post(LdStOp::Ldr, log2, RAX, RSI, step)),
            OpSize::Byte | OpSize::Word => {
                emit(buf, encode_ldst_post(LdStOp::Ldr, log2, SCRATCH1, RSI, step));
                gen_write_reg(buf, size, RAX, SCRATCH1);
            }
        },
        StrOp::Scas => {
            emit(buf, encode_ldst_post(LdStOp::Ldr, log2, SCRATCH1, RDI, step));
            gen_compare(buf, size, RAX, SCRATCH1);
        }
        StrOp::Cmps => {
            emit(buf, encode_ldst_post(LdStOp::Ldr, log2, SCRATCH0, RSI, step));
            emit(buf, encode_ldst_post(LdStOp::Ldr, log2, SCRATCH1, RDI, step));
            gen_compare(buf, size, SCRATCH0, SCRATCH1);
        }
    }
}

/// `CMP lhs, rhs` at `size`, narrow widths compared at the top of a
/// W register. May overwrite SCRATCH0.
fn gen_compare(buf: &mut CodeBuffer, size: OpSize, lhs: HostReg, rhs: HostReg) {
    match size {
        OpSize::Dword | OpSize::Qword => emit(
            buf,
            encode_addsub_reg(AddSubOp::Subs, is_wide(size), HostReg::Zr, lhs, rhs, Shift::Lsl, 0),
        ),
        OpSize::Byte | OpSize::Word => {
            let top = 32 - size.bits();
            emit(buf, encode_lsl_imm(false, SCRATCH0, lhs, top));
            emit(
                buf,
                encode_addsub_reg(AddSubOp::Subs, false, HostReg::Zr, SCRATCH0, rhs, Shift::Lsl, top),
            );
        }
    }
}
