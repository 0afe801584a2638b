//! Block assembler: drives decode → classify → liveness → dispatch →
//! exit stub → peephole for one guest basic block.

use dbt_backend::{optimize, CodeBuffer};
use dbt_core::tb::MAX_BLOCK_INSNS;
use dbt_core::{
    BlockState, ChainSlot, EndReason, ExitKind, ExitSite, FlagsOut, HelperExit, Insn, MAX_CHAIN_SLOTS,
};

use crate::classify::is_terminator;
use crate::ctx::{DisasContext, DisasJumpType};
use crate::dispatch::dispatch;
use crate::flags::{flags_live_in, flags_liveness, live_at_exit};
use crate::trans::exit::{gen_goto_tb, gen_helper_exit, MAX_EXIT_BYTES};
use crate::x86_64::decode;
use crate::{BlockLimits, GuestMemory, TranslateError};

/// Worst-case host bytes a single guest instruction expands to.
pub const MAX_HOST_BYTES_PER_INSN: usize = 256;

/// A finished block of host code, not yet installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledBlock {
    /// Guest address of the first instruction.
    pub pc: u64,
    /// Guest bytes covered.
    pub guest_size: u32,
    /// Guest instructions translated.
    pub icount: u16,
    /// Instructions replaced by a host NOP.
    pub unsupported: u16,
    pub end: EndReason,
    pub state: BlockState,
    pub exits: [Option<ExitSite>; MAX_CHAIN_SLOTS],
    pub exit_kind: ExitKind,
    /// Whether the block reads flags a predecessor produced.
    pub flags_in: bool,
    /// Flags the block's exits hand over.
    pub flags_out: FlagsOut,
    /// Host code, position independent apart from the chain sites.
    pub code: Vec<u8>,
    /// Words the peephole pass turned into NOPs.
    pub peephole_rewrites: usize,
}

impl AssembledBlock {
    /// One past the last guest byte.
    pub fn guest_end(&self) -> u64 {
        self.pc.wrapping_add(self.guest_size as u64)
    }
}

/// Decoded instructions of one block and why collection stopped.
struct Collected {
    insns: Vec<Insn>,
    end: EndReason,
    /// Address after the last collected instruction; for a decode fault,
    /// the faulting address.
    next: u64,
}

fn collect<M: GuestMemory + ?Sized>(mem: &M, pc: u64, limits: &BlockLimits) -> Collected {
    let max_insns = limits.max_insns.clamp(1, MAX_BLOCK_INSNS) as usize;
    let mut insns = Vec::new();
    let mut addr = pc;
    let mut bytes = 0u32;

    loop {
        if insns.len() >= max_insns {
            return Collected {
                insns,
                end: EndReason::InsnBudget,
                next: addr,
            };
        }
        let insn = match decode(mem.read_guest_bytes(addr), addr) {
            Ok(insn) => insn,
            Err(e) => {
                log::debug!("decode fault at {addr:#x}: {e}");
                return Collected {
                    insns,
                    end: EndReason::DecodeFault,
                    next: addr,
                };
            }
        };
        if !insns.is_empty() && bytes + insn.len as u32 > limits.max_guest_bytes {
            return Collected {
                insns,
                end: EndReason::InsnBudget,
                next: addr,
            };
        }
        bytes += insn.len as u32;
        addr = insn.next_pc();
        let term = is_terminator(&insn);
        insns.push(insn);
        if term {
            return Collected {
                insns,
                end: EndReason::Terminator,
                next: addr,
            };
        }
    }
}

/// Translate the guest block at `pc` into `buf`.
///
/// The buffer is reset first. The block always ends in a host control
/// transfer; decode faults, budgets and unsupported instructions shorten
/// or degrade it but never fail it. Only a buffer too small for a single
/// instruction plus its exit is an error.
pub fn translate_block<M: GuestMemory + ?Sized>(
    mem: &M,
    pc: u64,
    limits: &BlockLimits,
    buf: &mut CodeBuffer,
    optimize_code: bool,
) -> Result<AssembledBlock, TranslateError> {
    buf.reset();
    let Collected { insns, mut end, next } = collect(mem, pc, limits);

    let live_end = match end {
        EndReason::Terminator => live_at_exit(insns.last()),
        _ => true,
    };
    let live = flags_liveness(&insns, live_end);

    let mut ctx = DisasContext::new(pc);
    let mut unsupported = 0u16;

    for (i, insn) in insns.iter().enumerate() {
        if buf.remaining() < MAX_HOST_BYTES_PER_INSN + MAX_EXIT_BYTES {
            if i == 0 {
                log::warn!("block buffer too small for {pc:#x} ({} bytes)", buf.capacity());
                return Err(TranslateError::BufferOverflow {
                    pc,
                    capacity: buf.capacity(),
                });
            }
            end = EndReason::SizeBudget;
            ctx.is_jmp = DisasJumpType::TooMany;
            // The rest of the block becomes the successor.
            ctx.flags_live = true;
            break;
        }
        ctx.pc_next = insn.next_pc();
        ctx.flags_live = live[i];
        ctx.num_insns += 1;

        let out = dispatch(&mut ctx, buf, insn);
        if !out.success {
            unsupported += 1;
        }
        if out.terminator {
            if !out.success {
                // The bytes after an untranslated branch are not its
                // successor.
                gen_helper_exit(&mut ctx, buf, insn.addr, HelperExit::Unsupported, 0);
                ctx.is_jmp = DisasJumpType::NoReturn;
                end = EndReason::UnsupportedTerminator;
            }
            break;
        }
    }

    let guest_end = if end == EndReason::SizeBudget {
        ctx.pc_next
    } else if end == EndReason::DecodeFault {
        next
    } else {
        insns.last().map_or(pc, Insn::next_pc)
    };
    tb_stop(&mut ctx, buf, end, guest_end);

    if buf.overflowed() {
        log::warn!("block buffer overflow at {pc:#x} ({} bytes)", buf.capacity());
        return Err(TranslateError::BufferOverflow {
            pc,
            capacity: buf.capacity(),
        });
    }

    let mut code = buf.as_slice().to_vec();
    let peephole_rewrites = if optimize_code { optimize(&mut code) } else { 0 };

    let guest_size = guest_end.wrapping_sub(pc) as u32;
    log::debug!(
        "block {pc:#x}: {} insns, {guest_size} guest bytes, {} host bytes, {unsupported} unsupported, {end:?}",
        ctx.num_insns,
        code.len(),
    );

    Ok(AssembledBlock {
        pc,
        guest_size,
        icount: ctx.num_insns as u16,
        unsupported,
        end,
        state: BlockState::Terminated(end),
        exits: ctx.exits,
        exit_kind: ctx.exit_kind,
        flags_in: flags_live_in(&insns, &live),
        flags_out: ctx.flags_out,
        code,
        peephole_rewrites,
    })
}

/// Close the block unless the last instruction already did.
fn tb_stop(ctx: &mut DisasContext, buf: &mut CodeBuffer, end: EndReason, guest_end: u64) {
    if ctx.is_jmp == DisasJumpType::NoReturn {
        return;
    }
    if end == EndReason::DecodeFault {
        gen_helper_exit(ctx, buf, guest_end, HelperExit::DecodeFault, 0);
    } else {
        gen_goto_tb(ctx, buf, ChainSlot::FallThrough, guest_end);
    }
    ctx.is_jmp = DisasJumpType::NoReturn;
}
