//! Block exits.
//!
//! Every exit returns to the dispatcher with `RET`, leaving the next
//! guest PC in EXIT_PC. A direct exit starts with a chain site, a
//! `B +4` that the linker can retarget to another block without touching
//! the rest of the stub.
//!
//! Live flags leave a block in boundary form (see [`FlagsOut`]): the
//! exit first rewrites the host carry of an ADD or logic producer into
//! the inverted form a `SUBS` leaves. The rewrite sits before the chain
//! site, so chained and unchained paths both run it.

use dbt_backend::aarch64::emitter::*;
use dbt_backend::aarch64::regs::{EXIT_PC, EXIT_REASON, FLAGS_TMP};
use dbt_backend::label::{Label, RelocKind};
use dbt_backend::{CodeBuffer, HostReg};
use dbt_core::{ChainSlot, ExitKind, ExitSite, FlagsOut, HelperExit};

use crate::cond::{CondMapping, FlagsOrigin};
use crate::ctx::DisasContext;

/// Words of the flag rewrite in front of an exit.
pub const SYNC_FLAGS_WORDS: usize = 3;

/// Words in one direct exit stub: chain site, PC materialization, RET.
pub const GOTO_TB_WORDS: usize = 1 + MOVI_MAX_WORDS + 1;

/// Worst-case bytes of the exits that can end a block: a two-way branch
/// with a flag rewrite and a direct stub on each side.
pub const MAX_EXIT_BYTES: usize = (2 + 2 * (SYNC_FLAGS_WORDS + GOTO_TB_WORDS)) * 4;

/// Apply `op` with the C bit to the host flags.
fn gen_carry_op(buf: &mut CodeBuffer, op: LogicOp) {
    emit(buf, encode_mrs_nzcv(FLAGS_TMP));
    emit(buf, encode_logic_imm(op, true, FLAGS_TMP, FLAGS_TMP, NZCV_C_MASK));
    emit(buf, encode_msr_nzcv(FLAGS_TMP));
}

/// Invert the host carry, switching between the ADD and SUB carry
/// conventions. N, Z and V are kept.
pub fn gen_flip_carry(buf: &mut CodeBuffer) {
    gen_carry_op(buf, LogicOp::Eor);
}

/// Bring live host flags into boundary form and record what the exit
/// hands over. Leaves `ctx.origin` alone: the other side of a two-way
/// exit syncs from the same state.
fn gen_sync_flags(ctx: &mut DisasContext, buf: &mut CodeBuffer) {
    if !ctx.flags_live {
        ctx.flags_out = FlagsOut::Dead;
        return;
    }
    match ctx.origin {
        FlagsOrigin::Sub => {}
        FlagsOrigin::Add => gen_flip_carry(buf),
        // Logic results leave CF clear.
        FlagsOrigin::Logic => gen_carry_op(buf, LogicOp::Orr),
        _ => {
            ctx.flags_out = FlagsOut::Lost;
            return;
        }
    }
    ctx.flags_out = if ctx.flags_written {
        FlagsOut::Exact
    } else {
        FlagsOut::PassThrough
    };
}

/// Direct, chainable exit to `target` through chain slot `slot`.
pub fn gen_goto_tb(ctx: &mut DisasContext, buf: &mut CodeBuffer, slot: ChainSlot, target: u64) {
    gen_sync_flags(ctx, buf);
    let jmp_offset = buf.offset() as u32;
    emit(buf, B_NEXT);
    emit_movi(buf, true, EXIT_PC, target);
    emit(buf, encode_return());
    ctx.record_exit(
        slot,
        ExitSite {
            jmp_offset,
            target_pc: target,
        },
    );
}

/// Indirect exit: the next guest PC is in `target`.
pub fn gen_exit_tb(ctx: &mut DisasContext, buf: &mut CodeBuffer, target: HostReg) {
    ctx.exit_kind = ExitKind::Indirect;
    if target != EXIT_PC {
        emit_mov(buf, true, EXIT_PC, target);
    }
    gen_sync_flags(ctx, buf);
    emit(buf, encode_return());
}

/// Exit to the runtime with a reason code, to resume (or fault) at `pc`.
/// `arg` is stored in bits 8..16 of the reason.
pub fn gen_helper_exit(ctx: &mut DisasContext, buf: &mut CodeBuffer, pc: u64, reason: HelperExit, arg: u8) {
    ctx.exit_kind = ExitKind::Helper;
    gen_sync_flags(ctx, buf);
    emit_movi(buf, true, EXIT_PC, pc);
    let code = reason.code() as u64 | (arg as u64) << 8;
    emit_movi(buf, false, EXIT_REASON, code);
    emit(buf, encode_return());
}

/// Guest return: the dispatcher pops the return address itself.
pub fn gen_return(ctx: &mut DisasContext, buf: &mut CodeBuffer) {
    ctx.exit_kind = ExitKind::Return;
    ctx.flags_out = FlagsOut::Dead;
    emit(buf, encode_return());
}

/// Two-way exit: `taken` when the branch of `kind` is taken, `fallthrough`
/// otherwise. Returns false if the branch cannot be encoded.
pub fn gen_branch_exit(
    ctx: &mut DisasContext,
    buf: &mut CodeBuffer,
    kind: RelocKind,
    taken: u64,
    fallthrough: u64,
) -> bool {
    let mut label = Label::new();
    if label.branch(buf, kind).is_err() {
        return false;
    }
    gen_goto_tb(ctx, buf, ChainSlot::FallThrough, fallthrough);
    if label.bind(buf).is_err() {
        return false;
    }
    gen_goto_tb(ctx, buf, ChainSlot::Taken, taken);
    true
}

/// Conditional exit on a mapped guest condition.
pub fn gen_cond_exit(
    ctx: &mut DisasContext,
    buf: &mut CodeBuffer,
    cond: CondMapping,
    taken: u64,
    fallthrough: u64,
) -> bool {
    match cond {
        CondMapping::Host(c) => gen_branch_exit(ctx, buf, RelocKind::CondJump(c), taken, fallthrough),
        CondMapping::Always => {
            gen_goto_tb(ctx, buf, ChainSlot::Taken, taken);
            true
        }
        CondMapping::Never => {
            gen_goto_tb(ctx, buf, ChainSlot::FallThrough, fallthrough);
            true
        }
        CondMapping::Unsupported => false,
    }
}
