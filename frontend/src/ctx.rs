use dbt_core::{ChainSlot, ExitKind, ExitSite, FlagsOut, MAX_CHAIN_SLOTS};

use crate::cond::FlagsOrigin;

/// Block termination state set while translating an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasJumpType {
    /// Continue to the next sequential instruction.
    Next,
    /// Reached the instruction, byte or code-size budget.
    TooMany,
    /// The instruction emitted its own exits; nothing follows.
    NoReturn,
}

/// Per-block translation state shared by the category handlers.
#[derive(Debug, Clone)]
pub struct DisasContext {
    /// PC of the first instruction in this block.
    pub pc_first: u64,
    /// PC of the instruction after the one being translated.
    pub pc_next: u64,
    pub is_jmp: DisasJumpType,
    /// Guest instructions translated so far.
    pub num_insns: u32,
    /// Whether the guest flags produced by the current instruction are
    /// read before being overwritten.
    pub flags_live: bool,
    /// Producer family of the live host flags.
    pub origin: FlagsOrigin,
    /// Whether a guest flag write was translated in this block.
    pub flags_written: bool,
    /// Flags the block's exits hand over; set by the exit stubs.
    pub flags_out: FlagsOut,
    /// Chainable exits recorded so far, by slot.
    pub exits: [Option<ExitSite>; MAX_CHAIN_SLOTS],
    /// How the block leaves; set by the terminator.
    pub exit_kind: ExitKind,
}

impl DisasContext {
    pub fn new(pc: u64) -> Self {
        Self {
            pc_first: pc,
            pc_next: pc,
            is_jmp: DisasJumpType::Next,
            num_insns: 0,
            flags_live: true,
            // Flags flowing in from a predecessor are in boundary form,
            // which is what a compare leaves.
            origin: FlagsOrigin::Sub,
            flags_written: false,
            flags_out: FlagsOut::Dead,
            exits: [None; MAX_CHAIN_SLOTS],
            exit_kind: ExitKind::Direct,
        }
    }

    /// Record the origin of freshly written flags. When the flags are
    /// dead no flag-setting form was emitted, so nothing is known.
    #[inline]
    pub fn set_flags(&mut self, origin: FlagsOrigin) {
        self.flags_written = true;
        self.origin = if self.flags_live {
            origin
        } else {
            FlagsOrigin::Unknown
        };
    }

    /// The guest flags were rewritten in a form the host flags do not
    /// reproduce.
    #[inline]
    pub fn clobber_flags(&mut self) {
        self.flags_written = true;
        self.origin = FlagsOrigin::Unknown;
    }

    /// The guest rewrote CF/OF but kept ZF/SF, and the host flags were
    /// left alone: only the result-derived conditions stay usable.
    #[inline]
    pub fn keep_result_flags(&mut self) {
        self.flags_written = true;
        self.origin = match self.origin {
            FlagsOrigin::Unknown | FlagsOrigin::BitTest => FlagsOrigin::Unknown,
            _ => FlagsOrigin::ResultOnly,
        };
    }

    pub fn record_exit(&mut self, slot: ChainSlot, site: ExitSite) {
        self.exits[slot.index()] = Some(site);
    }
}
