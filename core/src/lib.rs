//! Shared data model of the x86-64 to AArch64 translator: the decoded
//! guest instruction record, guest registers and conditions, translation
//! categories and translated-block metadata.

pub mod category;
pub mod cond;
pub mod insn;
pub mod reg;
pub mod tb;

pub use category::Category;
pub use cond::{GuestCond, X86Flags};
pub use insn::{
    Displacement, Immediate, Insn, MemBase, MemOperand, ModRm, OpSize, OpcodeMap, Prefixes, Sib,
    MAX_INSN_LEN,
};
pub use reg::{Reg, Segment, NUM_GUEST_GPRS};
pub use tb::{
    BlockState, ChainSlot, EndReason, ExecHandle, ExitKind, ExitSite, FlagsOut, HelperExit,
    TbJmpState, TranslatedBlock, MAX_CHAIN_SLOTS,
};
