//! Decoded guest instruction record.
//!
//! One [`Insn`] is produced per decoded x86-64 instruction. The record is
//! plain `Copy` data: every classifier predicate and operand accessor is a
//! constant-time function of its fields.

use bitflags::bitflags;

use crate::reg::{Reg, Segment};

/// Architectural upper bound on x86 instruction length.
pub const MAX_INSN_LEN: usize = 15;

bitflags! {
    /// Legacy prefixes that preceded the opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Prefixes: u16 {
        /// 0x66 operand-size override.
        const OPSIZE = 1 << 0;
        /// 0x67 address-size override.
        const ADDRSIZE = 1 << 1;
        /// 0xF0
        const LOCK = 1 << 2;
        /// 0xF3 (REP / REPE, mandatory prefix for POPCNT etc.)
        const REP = 1 << 3;
        /// 0xF2 (REPNE, mandatory prefix for CRC32)
        const REPNE = 1 << 4;
        const SEG_ES = 1 << 5;
        const SEG_CS = 1 << 6;
        const SEG_SS = 1 << 7;
        const SEG_DS = 1 << 8;
        const SEG_FS = 1 << 9;
        const SEG_GS = 1 << 10;
    }
}

impl Prefixes {
    /// Legacy prefix for a byte, if it is one.
    pub const fn from_byte(b: u8) -> Option<Prefixes> {
        match b {
            0x66 => Some(Prefixes::OPSIZE),
            0x67 => Some(Prefixes::ADDRSIZE),
            0xF0 => Some(Prefixes::LOCK),
            0xF3 => Some(Prefixes::REP),
            0xF2 => Some(Prefixes::REPNE),
            0x26 => Some(Prefixes::SEG_ES),
            0x2E => Some(Prefixes::SEG_CS),
            0x36 => Some(Prefixes::SEG_SS),
            0x3E => Some(Prefixes::SEG_DS),
            0x64 => Some(Prefixes::SEG_FS),
            0x65 => Some(Prefixes::SEG_GS),
            _ => None,
        }
    }
}

/// Opcode escape the instruction was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeMap {
    /// One-byte opcode table.
    Primary,
    /// `0F xx`
    Ext0F,
    /// `0F 38 xx`
    Ext0F38,
    /// `0F 3A xx`
    Ext0F3A,
}

/// ModR/M byte with REX extensions already applied to `reg` and `rm`.
///
/// When `mode != 3` and the low three bits of `rm` are `100`, the memory
/// operand is described by the accompanying [`Sib`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModRm {
    pub mode: u8,
    pub reg: u8,
    pub rm: u8,
}

/// Scale-index-base byte with REX extensions applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sib {
    /// Shift amount (0..=3), i.e. log2 of the scale factor.
    pub scale: u8,
    /// `None` for the "no index" encoding.
    pub index: Option<u8>,
    /// `None` for the "disp32, no base" encoding (mod 00, base 101).
    pub base: Option<u8>,
}

/// Displacement as encoded; `width` is 0 when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Displacement {
    pub value: i32,
    pub width: u8,
}

/// Immediate as encoded, zero-extended; `width` is 0 when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Immediate {
    pub value: u64,
    pub width: u8,
}

impl Immediate {
    /// The immediate sign-extended from its encoded width.
    pub const fn sext(self) -> i64 {
        match self.width {
            1 => self.value as u8 as i8 as i64,
            2 => self.value as u16 as i16 as i64,
            4 => self.value as u32 as i32 as i64,
            _ => self.value as i64,
        }
    }
}

/// Operand size of an integer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpSize {
    Byte,
    Word,
    Dword,
    Qword,
}

impl OpSize {
    pub const fn bits(self) -> u32 {
        match self {
            OpSize::Byte => 8,
            OpSize::Word => 16,
            OpSize::Dword => 32,
            OpSize::Qword => 64,
        }
    }

    pub const fn bytes(self) -> u32 {
        self.bits() / 8
    }

    /// log2 of the byte width.
    pub const fn log2_bytes(self) -> u32 {
        match self {
            OpSize::Byte => 0,
            OpSize::Word => 1,
            OpSize::Dword => 2,
            OpSize::Qword => 3,
        }
    }

    /// Mask of the low `bits()` bits.
    pub const fn mask(self) -> u64 {
        match self {
            OpSize::Qword => u64::MAX,
            s => (1u64 << s.bits()) - 1,
        }
    }
}

/// Base of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemBase {
    Reg(Reg),
    /// RIP-relative: relative to the address of the next instruction.
    Rip,
    None,
}

/// Effective address `base + (index << scale) + disp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOperand {
    pub base: MemBase,
    pub index: Option<(Reg, u8)>,
    pub disp: i64,
    pub segment: Option<Segment>,
}

/// A decoded guest instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Insn {
    /// Guest address of the first prefix byte.
    pub addr: u64,
    pub map: OpcodeMap,
    pub opcode: u8,
    pub prefixes: Prefixes,
    /// Raw REX byte (`0x40..=0x4F`), or 0 when absent.
    pub rex: u8,
    pub modrm: Option<ModRm>,
    pub sib: Option<Sib>,
    pub disp: Displacement,
    pub imm: Immediate,
    /// Total encoded length in bytes (1..=15).
    pub len: u8,
}

impl Insn {
    #[inline]
    pub const fn next_pc(&self) -> u64 {
        self.addr.wrapping_add(self.len as u64)
    }

    #[inline]
    pub const fn has_rex(&self) -> bool {
        self.rex != 0
    }

    #[inline]
    pub const fn rex_w(&self) -> bool {
        self.rex & 0x8 != 0
    }

    /// `true` for a one-byte opcode `op`.
    #[inline]
    pub fn is(&self, op: u8) -> bool {
        self.map == OpcodeMap::Primary && self.opcode == op
    }

    /// `true` for a `0F`-escaped opcode `op`.
    #[inline]
    pub fn is_0f(&self, op: u8) -> bool {
        self.map == OpcodeMap::Ext0F && self.opcode == op
    }

    /// The ModR/M `reg` field without REX.R: the opcode extension of
    /// group instructions (`/0`..`/7`).
    #[inline]
    pub fn ext(&self) -> Option<u8> {
        self.modrm.map(|m| m.reg & 7)
    }

    /// Register named by ModR/M `reg`.
    #[inline]
    pub fn reg_operand(&self) -> Option<Reg> {
        self.modrm.map(|m| Reg::from_index(m.reg))
    }

    /// Register named by ModR/M `rm` when the operand is a register.
    #[inline]
    pub fn rm_reg(&self) -> Option<Reg> {
        match self.modrm {
            Some(m) if m.mode == 3 => Some(Reg::from_index(m.rm)),
            _ => None,
        }
    }

    /// Register encoded in the low three opcode bits (`50+r`, `B8+r`, ...).
    #[inline]
    pub fn opcode_reg(&self) -> Reg {
        Reg::from_index((self.opcode & 7) | ((self.rex & 1) << 3))
    }

    /// Operand size for instructions whose byte form is a separate opcode.
    pub fn op_size(&self) -> OpSize {
        if self.rex_w() {
            OpSize::Qword
        } else if self.prefixes.contains(Prefixes::OPSIZE) {
            OpSize::Word
        } else {
            OpSize::Dword
        }
    }

    /// Operand size for stack and near-branch operations, which default
    /// to 64 bits in long mode.
    pub fn stack_size(&self) -> OpSize {
        if self.prefixes.contains(Prefixes::OPSIZE) {
            OpSize::Word
        } else {
            OpSize::Qword
        }
    }

    /// Segment override, if one was given.
    pub fn segment(&self) -> Option<Segment> {
        let p = self.prefixes;
        if p.contains(Prefixes::SEG_FS) {
            Some(Segment::Fs)
        } else if p.contains(Prefixes::SEG_GS) {
            Some(Segment::Gs)
        } else if p.contains(Prefixes::SEG_ES) {
            Some(Segment::Es)
        } else if p.contains(Prefixes::SEG_CS) {
            Some(Segment::Cs)
        } else if p.contains(Prefixes::SEG_SS) {
            Some(Segment::Ss)
        } else if p.contains(Prefixes::SEG_DS) {
            Some(Segment::Ds)
        } else {
            None
        }
    }

    /// Memory operand described by ModR/M (and SIB), or `None` for a
    /// register operand or an instruction without ModR/M.
    pub fn mem_operand(&self) -> Option<MemOperand> {
        let m = self.modrm?;
        if m.mode == 3 {
            return None;
        }
        let disp = self.disp.value as i64;
        let segment = self.segment();
        if let Some(sib) = self.sib {
            return Some(MemOperand {
                base: sib.base.map_or(MemBase::None, |b| MemBase::Reg(Reg::from_index(b))),
                index: sib.index.map(|i| (Reg::from_index(i), sib.scale)),
                disp,
                segment,
            });
        }
        let base = if m.mode == 0 && m.rm & 7 == 5 {
            MemBase::Rip
        } else {
            MemBase::Reg(Reg::from_index(m.rm))
        };
        Some(MemOperand {
            base,
            index: None,
            disp,
            segment,
        })
    }

    /// Branch target of a relative jump/call (`next_pc + rel`).
    #[inline]
    pub fn rel_target(&self) -> u64 {
        self.next_pc().wrapping_add(self.imm.sext() as u64)
    }

    /// Condition nibble of `Jcc`/`SETcc`/`CMOVcc`.
    #[inline]
    pub const fn cond_code(&self) -> u8 {
        self.opcode & 0xF
    }
}
