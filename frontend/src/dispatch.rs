//! Category dispatch.

use dbt_backend::aarch64::emitter::{emit, encode_nop};
use dbt_backend::CodeBuffer;
use dbt_core::{Category, Insn};

use crate::classify::{classify, is_terminator};
use crate::ctx::DisasContext;
use crate::flags::flag_effect;
use crate::trans::{self, Handler};

/// Handler table, in classifier priority order.
const HANDLERS: [(Category, Handler); 6] = [
    (Category::Arith, trans::trans_arith),
    (Category::Memory, trans::trans_memory),
    (Category::ControlFlow, trans::trans_control_flow),
    (Category::Bit, trans::trans_bit),
    (Category::String, trans::trans_string),
    (Category::Misc, trans::trans_misc),
];

/// Result of translating one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// The handler translated the instruction.
    pub success: bool,
    /// The guest block must end after this instruction.
    pub terminator: bool,
    /// Guest bytes consumed.
    pub consumed: u8,
}

fn handler_for(cat: Category) -> Option<Handler> {
    HANDLERS.iter().find(|(c, _)| *c == cat).map(|&(_, h)| h)
}

/// Translate `insn` into `buf`.
///
/// An instruction that no handler accepts leaves a single host `NOP`
/// in place of whatever the handler emitted before refusing, and the
/// block goes on.
pub fn dispatch(ctx: &mut DisasContext, buf: &mut CodeBuffer, insn: &Insn) -> DispatchOutcome {
    let cat = classify(insn);
    let start = buf.offset();
    let saved_exits = ctx.exits;
    let saved_kind = ctx.exit_kind;
    let saved_jmp = ctx.is_jmp;
    let saved_flags = (ctx.origin, ctx.flags_written, ctx.flags_out);

    let success = match handler_for(cat) {
        Some(handler) => handler(ctx, buf, insn),
        None => false,
    };

    if !success {
        buf.set_offset(start);
        ctx.exits = saved_exits;
        ctx.exit_kind = saved_kind;
        ctx.is_jmp = saved_jmp;
        (ctx.origin, ctx.flags_written, ctx.flags_out) = saved_flags;
        if flag_effect(insn).writes {
            ctx.clobber_flags();
        }
        emit(buf, encode_nop());
        log::debug!(
            "unsupported {} insn at {:#x} (opcode {:#x})",
            cat.name(),
            insn.addr,
            insn.opcode
        );
    }

    DispatchOutcome {
        success,
        terminator: is_terminator(insn),
        consumed: insn.len,
    }
}
