//! NOPs, rAX sign extension, flag control, timestamps and the system
//! instructions that leave translated code through a helper exit.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::SCRATCH0;
use dbt_backend::{CodeBuffer, HostReg};
use dbt_core::{HelperExit, Insn, OpSize};

use super::exit::gen_helper_exit;
use crate::ctx::{DisasContext, DisasJumpType};
use crate::x86_64::opcodes::*;

const RAX: HostReg = HostReg::X0;
const RDX: HostReg = HostReg::X2;

pub fn trans_misc(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> bool {
    match opc(insn) {
        // Also PAUSE (F3 90).
        OPC_NOP | OPC_NOP_Ev => {
            emit(buf, encode_nop());
            true
        }
        OPC_CWDE => {
            gen_sign_extend_rax(buf, insn.op_size());
            true
        }
        OPC_CDQ => {
            gen_sign_to_rdx(buf, insn.op_size());
            true
        }
        OPC_CLD => true,
        OPC_RDTSC => {
            emit(buf, encode_mrs_cntvct(SCRATCH0));
            emit_mov(buf, false, RAX, SCRATCH0);
            emit(buf, encode_lsr_imm(true, RDX, SCRATCH0, 32));
            true
        }
        OPC_HLT => helper_exit(ctx, buf, insn.next_pc(), HelperExit::Halt, 0),
        OPC_CPUID => helper_exit(ctx, buf, insn.next_pc(), HelperExit::Cpuid, 0),
        OPC_SYSCALL => helper_exit(ctx, buf, insn.next_pc(), HelperExit::Syscall, 0),
        OPC_INT3 => helper_exit(ctx, buf, insn.next_pc(), HelperExit::Breakpoint, 0),
        OPC_INT_Ib => helper_exit(ctx, buf, insn.next_pc(), HelperExit::Interrupt, insn.imm.value as u8),
        OPC_UD2 => helper_exit(ctx, buf, insn.addr, HelperExit::Undefined, 0),
        // CLI, STI and STD have no user-mode translation.
        _ => false,
    }
}

fn helper_exit(ctx: &mut DisasContext, buf: &mut CodeBuffer, pc: u64, reason: HelperExit, arg: u8) -> bool {
    gen_helper_exit(ctx, buf, pc, reason, arg);
    ctx.is_jmp = DisasJumpType::NoReturn;
    true
}

/// CBW / CWDE / CDQE: sign-extend the lower half of rAX into rAX.
pub fn gen_sign_extend_rax(buf: &mut CodeBuffer, size: OpSize) {
    match size {
        OpSize::Qword => emit(buf, encode_sbfx(true, RAX, RAX, 0, 32)),
        OpSize::Dword => emit(buf, encode_sbfx(false, RAX, RAX, 0, 16)),
        OpSize::Word | OpSize::Byte => {
            emit(buf, encode_sbfx(false, SCRATCH0, RAX, 0, 8));
            emit(buf, encode_bfi(true, RAX, SCRATCH0, 0, 16));
        }
    }
}

/// CWD / CDQ / CQO: fill rDX with the sign of rAX.
pub fn gen_sign_to_rdx(buf: &mut CodeBuffer, size: OpSize) {
    match size {
        OpSize::Qword => emit(buf, encode_asr_imm(true, RDX, RAX, 63)),
        OpSize::Dword => emit(buf, encode_asr_imm(false, RDX, RAX, 31)),
        OpSize::Word | OpSize::Byte => {
            emit(buf, encode_sbfx(false, SCRATCH0, RAX, 15, 1));
            emit(buf, encode_bfi(true, RDX, SCRATCH0, 0, 16));
        }
    }
}
