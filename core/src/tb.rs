use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;

/// Number of chainable exits per block (fall-through and taken).
pub const MAX_CHAIN_SLOTS: usize = 2;

/// Default maximum number of guest instructions per block.
pub const DEFAULT_MAX_INSNS: u32 = 512;

/// Hard cap on guest instructions per block; block counters are `u16`.
pub const MAX_BLOCK_INSNS: u32 = u16::MAX as u32;

/// Chain slot of a direct exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ChainSlot {
    /// Sequential successor: not-taken side of a conditional branch,
    /// or the continuation of a block cut by a budget.
    FallThrough = 0,
    /// Target of a taken branch, jump or call.
    Taken = 1,
}

impl ChainSlot {
    pub const ALL: [ChainSlot; MAX_CHAIN_SLOTS] = [ChainSlot::FallThrough, ChainSlot::Taken];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A chainable direct exit inside a block's host code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitSite {
    /// Offset of the patchable jump word from the block start.
    pub jmp_offset: u32,
    /// Guest address the exit continues at.
    pub target_pc: u64,
}

/// Reason code left in the exit-reason register by non-chainable exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HelperExit {
    Syscall = 1,
    Cpuid = 2,
    Halt = 3,
    Breakpoint = 4,
    /// `INT n`; the vector is stored in bits 8..16 of the reason.
    Interrupt = 5,
    Undefined = 6,
    DecodeFault = 7,
    Unsupported = 8,
}

impl HelperExit {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Reason for the low byte of an exit-reason register value.
    pub const fn from_code(code: u16) -> Option<HelperExit> {
        Some(match code & 0xFF {
            1 => HelperExit::Syscall,
            2 => HelperExit::Cpuid,
            3 => HelperExit::Halt,
            4 => HelperExit::Breakpoint,
            5 => HelperExit::Interrupt,
            6 => HelperExit::Undefined,
            7 => HelperExit::DecodeFault,
            8 => HelperExit::Unsupported,
            _ => return None,
        })
    }
}

/// How a block hands control back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    /// Chainable direct exits; the next PC is in the exit-pc register.
    Direct,
    /// Computed target in the exit-pc register.
    Indirect,
    /// Guest return: the dispatcher pops the return address from the
    /// guest stack.
    Return,
    /// Reason code in the exit-reason register, PC in the exit-pc register.
    Helper,
}

/// Why the assembler stopped collecting instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// A guest control transfer or system instruction ended the block.
    Terminator,
    /// The instruction or guest-byte budget was reached.
    InsnBudget,
    /// The host code buffer could not fit another worst-case expansion.
    SizeBudget,
    /// The next guest bytes did not decode.
    DecodeFault,
    /// A control transfer could not be translated.
    UnsupportedTerminator,
}

/// Guest flags a block hands to its successor.
///
/// At a block boundary live flags are kept in host NZCV with N, Z and V
/// holding SF, ZF and OF and C holding the inverse of CF, the form a
/// `SUBS` leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FlagsOut {
    /// No successor reads them.
    #[default]
    Dead,
    /// Produced in the block and in boundary form.
    Exact,
    /// The block wrote flags it could not express in boundary form.
    Lost,
    /// The block never wrote flags; whatever came in goes out.
    PassThrough,
}

impl FlagsOut {
    /// Flags leaving a block that received `incoming`.
    pub const fn after(self, incoming: FlagsOut) -> FlagsOut {
        match self {
            FlagsOut::PassThrough => incoming,
            other => other,
        }
    }
}

/// Assembly state of one basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockState {
    Collecting,
    Terminated(EndReason),
    /// Copied into executable memory and published in the cache.
    Flushed,
}

/// Opaque reference to host code living in executable memory.
///
/// Only an executable-memory allocator constructs one, so holding an
/// `ExecHandle` means the range was handed out by that allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecHandle {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the handle is an address range; the owning allocator
// keeps the mapping alive and serializes writes to it.
unsafe impl Send for ExecHandle {}
unsafe impl Sync for ExecHandle {}

impl ExecHandle {
    /// # Safety
    /// `ptr..ptr+len` must be executable memory owned by the caller's
    /// allocator and stay mapped while the handle is reachable.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Host address of the first byte.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.ptr.as_ptr() as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `addr..addr+len` lies inside this handle.
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        let start = self.addr();
        addr >= start && (len as u64) <= self.len as u64 && addr - start <= (self.len - len) as u64
    }
}

/// Per-block chaining state, guarded by the block's `jmp` lock.
#[derive(Debug, Default)]
pub struct TbJmpState {
    /// Block each slot is currently patched to jump to.
    pub jmp_dest: [Option<Weak<TranslatedBlock>>; MAX_CHAIN_SLOTS],
    /// Blocks whose slot jumps into this block (incoming edges).
    pub jmp_list: Vec<(Weak<TranslatedBlock>, ChainSlot)>,
}

/// A translated basic block installed in executable memory.
#[derive(Debug)]
pub struct TranslatedBlock {
    /// Guest address of the first instruction.
    pub pc: u64,
    /// Guest bytes covered.
    pub size: u32,
    /// Guest instructions covered.
    pub icount: u16,
    /// Instructions replaced by a host NOP.
    pub unsupported: u16,
    pub end: EndReason,
    pub exit_kind: ExitKind,
    pub host: ExecHandle,
    pub exits: [Option<ExitSite>; MAX_CHAIN_SLOTS],
    /// Whether the block reads guest flags a predecessor produced.
    pub flags_in: bool,
    pub flags_out: FlagsOut,
    /// Set once the block was evicted by invalidation.
    pub invalid: AtomicBool,
    pub jmp: Mutex<TbJmpState>,
}

impl TranslatedBlock {
    pub fn new(
        pc: u64,
        size: u32,
        icount: u16,
        host: ExecHandle,
        exits: [Option<ExitSite>; MAX_CHAIN_SLOTS],
        end: EndReason,
        exit_kind: ExitKind,
    ) -> Self {
        Self {
            pc,
            size,
            icount,
            unsupported: 0,
            end,
            exit_kind,
            host,
            exits,
            flags_in: false,
            flags_out: FlagsOut::Dead,
            invalid: AtomicBool::new(false),
            jmp: Mutex::new(TbJmpState::default()),
        }
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Whether the guest range of this block overlaps `start..start+len`.
    pub fn overlaps(&self, start: u64, len: u64) -> bool {
        let end = start.saturating_add(len);
        let tb_end = self.pc.saturating_add(self.size.max(1) as u64);
        self.pc < end && start < tb_end
    }

    /// Whether this block may run after a predecessor that left
    /// `incoming`.
    pub fn accepts_flags(&self, incoming: FlagsOut) -> bool {
        !(self.flags_in && incoming == FlagsOut::Lost)
    }

    /// Host address of the patchable jump of `slot`, if that exit exists.
    pub fn exit_addr(&self, slot: ChainSlot) -> Option<u64> {
        self.exits[slot.index()].map(|e| self.host.addr() + e.jmp_offset as u64)
    }
}
