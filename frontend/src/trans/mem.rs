//! Data movement: MOV in all its forms, LEA, PUSH/POP, XCHG and the
//! zero/sign-extending moves.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{SCRATCH0, SCRATCH1, SCRATCH2};
use dbt_backend::{CodeBuffer, HostReg};
use dbt_core::{Insn, MemBase, OpSize, Prefixes, Segment};

use super::operand::*;
use crate::ctx::DisasContext;
use crate::regmap::host_reg;
use crate::x86_64::opcodes::*;

const RSP: HostReg = HostReg::X4;

pub fn trans_memory(_ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let key = opc(insn);
    match key {
        OPC_MOVB_EvGv | OPC_MOVL_EvGv => {
            let size = if key == OPC_MOVB_EvGv { OpSize::Byte } else { insn.op_size() };
            let (Some(src), Some(place)) = (reg_operand(insn, size), resolve_rm(buf, insn, size)) else {
                return false;
            };
            gen_write_place(buf, place, size, src);
            true
        }
        OPC_MOVB_GvEv | OPC_MOVL_GvEv => {
            let size = if key == OPC_MOVB_GvEv { OpSize::Byte } else { insn.op_size() };
            let (Some(dst), Some(place)) = (reg_operand(insn, size), resolve_rm(buf, insn, size)) else {
                return false;
            };
            match place {
                Place::Reg(src) => gen_write_reg(buf, size, dst, src),
                Place::Mem(a) => gen_load_reg(buf, size, dst, a),
            }
            true
        }
        OPC_MOVB_EvIb | OPC_MOVL_EvIz => {
            let size = if key == OPC_MOVB_EvIb { OpSize::Byte } else { insn.op_size() };
            let Some(place) = resolve_rm(buf, insn, size) else {
                return false;
            };
            gen_mov_imm(buf, size, place, imm_operand(insn));
            true
        }
        0xB0..=0xBF => {
            let size = if key < OPC_MOVL_Iv { OpSize::Byte } else { insn.op_size() };
            let Some(dst) = reg_view(insn, insn.opcode_reg().index(), size) else {
                return false;
            };
            gen_mov_imm(buf, size, Place::Reg(dst), insn.imm.value as i64);
            true
        }
        OPC_MOVB_AL_Ob | OPC_MOVL_EAX_Ov | OPC_MOVB_Ob_AL | OPC_MOVL_Ov_EAX => trans_mov_moffs(buf, insn, key),
        OPC_LEA => trans_lea(buf, insn),
        0x50..=0x57 => {
            if insn.prefixes.contains(Prefixes::OPSIZE) {
                return false;
            }
            gen_push_reg(buf, host_reg(insn.opcode_reg()));
            true
        }
        0x58..=0x5F => {
            if insn.prefixes.contains(Prefixes::OPSIZE) {
                return false;
            }
            gen_pop_reg(buf, host_reg(insn.opcode_reg()));
            true
        }
        OPC_PUSH_Iz | OPC_PUSH_Ib => {
            if insn.prefixes.contains(Prefixes::OPSIZE) {
                return false;
            }
            let val = gen_imm_reg(buf, OpSize::Qword, imm_operand(insn), SCRATCH1);
            gen_push_reg(buf, val);
            true
        }
        OPC_GRP5 => {
            if insn.prefixes.contains(Prefixes::OPSIZE) {
                return false;
            }
            match resolve_rm(buf, insn, OpSize::Qword) {
                Some(Place::Reg(r)) => gen_push_reg(buf, r),
                Some(Place::Mem(a)) => {
                    gen_load(buf, OpSize::Qword, SCRATCH1, a);
                    gen_push_reg(buf, SCRATCH1);
                }
                None => return false,
            }
            true
        }
        OPC_POP_Ev => trans_pop_rm(buf, insn),
        OPC_XCHGB_EvGv | OPC_XCHG_EvGv => {
            let size = if key == OPC_XCHGB_EvGv { OpSize::Byte } else { insn.op_size() };
            let (Some(r), Some(place)) = (reg_operand(insn, size), resolve_rm(buf, insn, size)) else {
                return false;
            };
            gen_xchg(buf, size, r, place);
            true
        }
        OPC_XCHG_ax_r..=0x97 => {
            let size = insn.op_size();
            gen_xchg(buf, size, HostReg::X0, Place::Reg(host_reg(insn.opcode_reg())));
            true
        }
        OPC_MOVZBL | OPC_MOVZWL | OPC_MOVSBL | OPC_MOVSWL => {
            let src_size = if key == OPC_MOVZBL || key == OPC_MOVSBL {
                OpSize::Byte
            } else {
                OpSize::Word
            };
            let signed = key == OPC_MOVSBL || key == OPC_MOVSWL;
            gen_extend(buf, insn, src_size, signed)
        }
        OPC_MOVSLQ => {
            if insn.rex_w() {
                gen_extend(buf, insn, OpSize::Dword, true)
            } else {
                // Without REX.W this is a plain 32-bit move.
                let size = insn.op_size();
                let (Some(dst), Some(place)) = (reg_operand(insn, size), resolve_rm(buf, insn, size)) else {
                    return false;
                };
                match place {
                    Place::Reg(src) => gen_write_reg(buf, size, dst, src),
                    Place::Mem(a) => gen_load_reg(buf, size, dst, a),
                }
                true
            }
        }
        _ => false,
    }
}

/// Load `size` bytes into guest register `dst` with register-write
/// semantics.
fn gen_load_reg(buf: &mut CodeBuffer, size: OpSize, dst: HostReg, a: Addr) {
    match size {
        OpSize::Dword | OpSize::Qword => gen_load(buf, size, dst, a),
        OpSize::Byte | OpSize::Word => {
            gen_load(buf, size, SCRATCH1, a);
            gen_write_reg(buf, size, dst, SCRATCH1);
        }
    }
}

fn gen_mov_imm(buf: &mut CodeBuffer, size: OpSize, place: Place, value: i64) {
    match place {
        Place::Reg(r) if matches!(size, OpSize::Dword | OpSize::Qword) => {
            emit_movi(buf, is_wide(size), r, value as u64 & size.mask());
        }
        _ => {
            let val = gen_imm_reg(buf, size, value, SCRATCH1);
            gen_write_place(buf, place, size, val);
        }
    }
}

/// `MOV AL/rAX, [moffs]` and `MOV [moffs], AL/rAX`.
fn trans_mov_moffs(buf: &mut CodeBuffer, insn: &Insn, key: u32) -> bool {
    if insn.prefixes.contains(Prefixes::ADDRSIZE) || matches!(insn.segment(), Some(Segment::Fs | Segment::Gs)) {
        return false;
    }
    let size = if key == OPC_MOVB_AL_Ob || key == OPC_MOVB_Ob_AL {
        OpSize::Byte
    } else {
        insn.op_size()
    };
    emit_movi(buf, true, SCRATCH0, insn.imm.value);
    let a = Addr {
        base: SCRATCH0,
        offset: 0,
    };
    if key == OPC_MOVB_AL_Ob || key == OPC_MOVL_EAX_Ov {
        gen_load_reg(buf, size, HostReg::X0, a);
    } else {
        gen_store(buf, size, HostReg::X0, a);
    }
    true
}

/// LEA: the effective address itself, truncated to the operand size.
fn trans_lea(buf: &mut CodeBuffer, insn: &Insn) -> bool {
    let size = insn.op_size();
    if !matches!(size, OpSize::Dword | OpSize::Qword) || insn.prefixes.contains(Prefixes::ADDRSIZE) {
        return false;
    }
    let (Some(dst), Some(mem)) = (reg_operand(insn, size), insn.mem_operand()) else {
        return false;
    };
    let sf = is_wide(size);
    let disp = mem.disp;
    match (mem.base, mem.index) {
        (MemBase::Rip, _) => {
            let addr = insn.next_pc().wrapping_add(disp as u64);
            emit_movi(buf, sf, dst, addr & size.mask());
        }
        (MemBase::None, None) => emit_movi(buf, sf, dst, disp as u64 & size.mask()),
        (MemBase::Reg(b), None) => {
            emit_addsub_imm(buf, AddSubOp::Add, sf, dst, host_reg(b), disp, SCRATCH2);
        }
        (MemBase::Reg(b), Some((i, scale))) => {
            emit(
                buf,
                encode_addsub_reg(AddSubOp::Add, sf, dst, host_reg(b), host_reg(i), Shift::Lsl, scale as u32),
            );
            if disp != 0 {
                emit_addsub_imm(buf, AddSubOp::Add, sf, dst, dst, disp, SCRATCH2);
            }
        }
        (MemBase::None, Some((i, scale))) => {
            emit(buf, encode_lsl_imm(sf, dst, host_reg(i), scale as u32));
            if disp != 0 {
                emit_addsub_imm(buf, AddSubOp::Add, sf, dst, dst, disp, SCRATCH2);
            }
        }
    }
    true
}

/// `PUSH r64`. Pushing RSP stores its value before the decrement.
fn gen_push_reg(buf: &mut CodeBuffer, r: HostReg) {
    let src = if r == RSP {
        emit_mov(buf, true, SCRATCH0, RSP);
        SCRATCH0
    } else {
        r
    };
    emit(buf, encode_ldst_pre(LdStOp::Str, 3, src, RSP, -8));
}

/// `POP r64`. Popping into RSP discards the increment.
fn gen_pop_reg(buf: &mut CodeBuffer, r: HostReg) {
    if r == RSP {
        emit(buf, encode_ldst_uimm(LdStOp::Ldr, 3, RSP, RSP, 0));
    } else {
        emit(buf, encode_ldst_post(LdStOp::Ldr, 3, r, RSP, 8));
    }
}

/// `POP r/m64`: a memory destination is addressed with the
/// incremented RSP.
fn trans_pop_rm(buf: &mut CodeBuffer, insn: &Insn) -> bool {
    if insn.prefixes.contains(Prefixes::OPSIZE) {
        return false;
    }
    if let Some(r) = insn.rm_reg() {
        gen_pop_reg(buf, host_reg(r));
        return true;
    }
    emit(buf, encode_ldst_post(LdStOp::Ldr, 3, SCRATCH1, RSP, 8));
    match resolve_rm(buf, insn, OpSize::Qword) {
        Some(Place::Mem(a)) => {
            gen_store(buf, OpSize::Qword, SCRATCH1, a);
            true
        }
        _ => false,
    }
}

fn gen_xchg(buf: &mut CodeBuffer, size: OpSize, r: HostReg, place: Place) {
    match place {
        Place::Reg(other) => {
            emit_mov(buf, true, SCRATCH0, other);
            gen_write_reg(buf, size, other, r);
            gen_write_reg(buf, size, r, SCRATCH0);
        }
        Place::Mem(a) => {
            gen_load(buf, size, SCRATCH1, a);
            gen_store(buf, size, r, a);
            gen_write_reg(buf, size, r, SCRATCH1);
        }
    }
}

/// MOVZX/MOVSX/MOVSXD from `src_size` to the operand size.
fn gen_extend(buf: &mut CodeBuffer, insn: &Insn, src_size: OpSize, signed: bool) -> bool {
    let size = insn.op_size();
    let Some(dst) = reg_operand(insn, size) else {
        return false;
    };
    let Some(place) = resolve_rm(buf, insn, src_size) else {
        return false;
    };
    // Word destinations are assembled in a scratch register and merged.
    let (rd, sf) = match size {
        OpSize::Word | OpSize::Byte => (SCRATCH1, false),
        _ => (dst, is_wide(size)),
    };
    let bits = src_size.bits();
    match place {
        Place::Reg(src) if signed => emit(buf, encode_sbfx(sf, rd, src, 0, bits)),
        Place::Reg(src) => emit(buf, encode_ubfx(sf, rd, src, 0, bits)),
        Place::Mem(a) if signed => gen_load_sx(buf, src_size, sf, rd, a),
        Place::Mem(a) => gen_load(buf, src_size, rd, a),
    }
    if rd != dst {
        gen_write_reg(buf, size, dst, rd);
    }
    true
}
