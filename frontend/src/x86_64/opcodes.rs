//! Guest opcode constants and the per-opcode decode tables.
//!
//! Escaped opcodes are folded into one `u32` key with `P_EXT*` bits so a
//! single `match` can cover all maps (see [`opc`]).

use dbt_core::{Insn, OpcodeMap};

// -- Map flags --

pub const P_EXT: u32 = 0x100; // 0x0F escape
pub const P_EXT38: u32 = 0x200; // 0x0F 0x38 escape
pub const P_EXT3A: u32 = 0x400; // 0x0F 0x3A escape

/// Opcode key of a decoded instruction: the opcode byte plus its map flag.
#[inline]
pub fn opc(insn: &Insn) -> u32 {
    let map = match insn.map {
        OpcodeMap::Primary => 0,
        OpcodeMap::Ext0F => P_EXT,
        OpcodeMap::Ext0F38 => P_EXT38,
        OpcodeMap::Ext0F3A => P_EXT3A,
    };
    map | insn.opcode as u32
}

// -- Opcode constants (OPC_*) --

// Arithmetic
pub const OPC_ARITH_EbIb: u32 = 0x80;
pub const OPC_ARITH_EvIz: u32 = 0x81;
pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_TESTB: u32 = 0x84;
pub const OPC_TESTL: u32 = 0x85;
pub const OPC_TESTB_AL: u32 = 0xA8;
pub const OPC_TESTL_EAX: u32 = 0xA9;
pub const OPC_IMUL_GvEv: u32 = 0xAF | P_EXT;
pub const OPC_IMUL_GvEvIz: u32 = 0x69;
pub const OPC_IMUL_GvEvIb: u32 = 0x6B;

// Shift
pub const OPC_SHIFTB_Ib: u32 = 0xC0;
pub const OPC_SHIFT_Ib: u32 = 0xC1;
pub const OPC_SHIFTB_1: u32 = 0xD0;
pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFTB_cl: u32 = 0xD2;
pub const OPC_SHIFT_cl: u32 = 0xD3;

// Group opcodes
pub const OPC_GRP3_Eb: u32 = 0xF6;
pub const OPC_GRP3_Ev: u32 = 0xF7;
pub const OPC_GRP4: u32 = 0xFE;
pub const OPC_GRP5: u32 = 0xFF;
pub const OPC_GRPBT: u32 = 0xBA | P_EXT;
pub const OPC_POP_Ev: u32 = 0x8F;

// Data movement
pub const OPC_MOVB_EvGv: u32 = 0x88;
pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVB_GvEv: u32 = 0x8A;
pub const OPC_MOVL_GvEv: u32 = 0x8B;
pub const OPC_LEA: u32 = 0x8D;
pub const OPC_MOVB_EvIb: u32 = 0xC6;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVB_Ib: u32 = 0xB0;
pub const OPC_MOVL_Iv: u32 = 0xB8;
pub const OPC_MOVB_AL_Ob: u32 = 0xA0;
pub const OPC_MOVL_EAX_Ov: u32 = 0xA1;
pub const OPC_MOVB_Ob_AL: u32 = 0xA2;
pub const OPC_MOVL_Ov_EAX: u32 = 0xA3;
pub const OPC_PUSH_r: u32 = 0x50;
pub const OPC_POP_r: u32 = 0x58;
pub const OPC_PUSH_Iz: u32 = 0x68;
pub const OPC_PUSH_Ib: u32 = 0x6A;
pub const OPC_XCHGB_EvGv: u32 = 0x86;
pub const OPC_XCHG_EvGv: u32 = 0x87;
pub const OPC_XCHG_ax_r: u32 = 0x90;

// Extensions
pub const OPC_MOVZBL: u32 = 0xB6 | P_EXT;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_MOVSBL: u32 = 0xBE | P_EXT;
pub const OPC_MOVSWL: u32 = 0xBF | P_EXT;
pub const OPC_MOVSLQ: u32 = 0x63;

// Branch
pub const OPC_JCC_short: u32 = 0x70;
pub const OPC_JCC_long: u32 = 0x80 | P_EXT;
pub const OPC_JMP_short: u32 = 0xEB;
pub const OPC_JMP_long: u32 = 0xE9;
pub const OPC_CALL_Jz: u32 = 0xE8;
pub const OPC_RET: u32 = 0xC3;
pub const OPC_RET_Iw: u32 = 0xC2;
pub const OPC_LOOPNE: u32 = 0xE0;
pub const OPC_LOOPE: u32 = 0xE1;
pub const OPC_LOOP: u32 = 0xE2;
pub const OPC_JRCXZ: u32 = 0xE3;

// Compare / conditional
pub const OPC_CMOVCC: u32 = 0x40 | P_EXT;
pub const OPC_SETCC: u32 = 0x90 | P_EXT;

// Bit operations
pub const OPC_BSF: u32 = 0xBC | P_EXT;
pub const OPC_BSR: u32 = 0xBD | P_EXT;
pub const OPC_POPCNT: u32 = 0xB8 | P_EXT;
pub const OPC_BT: u32 = 0xA3 | P_EXT;
pub const OPC_BTS: u32 = 0xAB | P_EXT;
pub const OPC_BTR: u32 = 0xB3 | P_EXT;
pub const OPC_BTC: u32 = 0xBB | P_EXT;
pub const OPC_BSWAP: u32 = 0xC8 | P_EXT;
pub const OPC_CRC32_Eb: u32 = 0xF0 | P_EXT38;
pub const OPC_CRC32_Ev: u32 = 0xF1 | P_EXT38;

// Double-precision shift
pub const OPC_SHLD_Ib: u32 = 0xA4 | P_EXT;
pub const OPC_SHLD_cl: u32 = 0xA5 | P_EXT;
pub const OPC_SHRD_Ib: u32 = 0xAC | P_EXT;
pub const OPC_SHRD_cl: u32 = 0xAD | P_EXT;

// String
pub const OPC_MOVSB: u32 = 0xA4;
pub const OPC_MOVS: u32 = 0xA5;
pub const OPC_CMPSB: u32 = 0xA6;
pub const OPC_CMPS: u32 = 0xA7;
pub const OPC_STOSB: u32 = 0xAA;
pub const OPC_STOS: u32 = 0xAB;
pub const OPC_LODSB: u32 = 0xAC;
pub const OPC_LODS: u32 = 0xAD;
pub const OPC_SCASB: u32 = 0xAE;
pub const OPC_SCAS: u32 = 0xAF;

// Misc
pub const OPC_NOP: u32 = 0x90;
pub const OPC_NOP_Ev: u32 = 0x1F | P_EXT;
pub const OPC_CWDE: u32 = 0x98;
pub const OPC_CDQ: u32 = 0x99;
pub const OPC_HLT: u32 = 0xF4;
pub const OPC_CLI: u32 = 0xFA;
pub const OPC_STI: u32 = 0xFB;
pub const OPC_CLD: u32 = 0xFC;
pub const OPC_STD: u32 = 0xFD;
pub const OPC_INT3: u32 = 0xCC;
pub const OPC_INT_Ib: u32 = 0xCD;
pub const OPC_SYSCALL: u32 = 0x05 | P_EXT;
pub const OPC_UD2: u32 = 0x0B | P_EXT;
pub const OPC_RDTSC: u32 = 0x31 | P_EXT;
pub const OPC_CPUID: u32 = 0xA2 | P_EXT;

// -- Sub-operation enums --

/// Arithmetic sub-opcodes (the /r field of 0x80/0x81/0x83, and bits 5:3
/// of the 0x00..0x3F opcode rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Or = 1,
    Adc = 2,
    Sbb = 3,
    And = 4,
    Sub = 5,
    Xor = 6,
    Cmp = 7,
}

impl ArithOp {
    pub const fn from_ext(ext: u8) -> ArithOp {
        match ext & 7 {
            0 => ArithOp::Add,
            1 => ArithOp::Or,
            2 => ArithOp::Adc,
            3 => ArithOp::Sbb,
            4 => ArithOp::And,
            5 => ArithOp::Sub,
            6 => ArithOp::Xor,
            _ => ArithOp::Cmp,
        }
    }
}

/// Shift sub-opcodes (the /r field of 0xC0/0xC1/0xD0..0xD3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Rol = 0,
    Ror = 1,
    Rcl = 2,
    Rcr = 3,
    Shl = 4,
    Shr = 5,
    /// Undocumented alias of SHL.
    Sal = 6,
    Sar = 7,
}

impl ShiftOp {
    pub const fn from_ext(ext: u8) -> ShiftOp {
        match ext & 7 {
            0 => ShiftOp::Rol,
            1 => ShiftOp::Ror,
            2 => ShiftOp::Rcl,
            3 => ShiftOp::Rcr,
            4 => ShiftOp::Shl,
            5 => ShiftOp::Shr,
            6 => ShiftOp::Sal,
            _ => ShiftOp::Sar,
        }
    }
}

/// Group 3 sub-opcodes (0xF6/0xF7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Grp3Op {
    Test = 0,
    /// Undocumented alias of TEST.
    Test1 = 1,
    Not = 2,
    Neg = 3,
    Mul = 4,
    Imul = 5,
    Div = 6,
    Idiv = 7,
}

impl Grp3Op {
    pub const fn from_ext(ext: u8) -> Grp3Op {
        match ext & 7 {
            0 => Grp3Op::Test,
            1 => Grp3Op::Test1,
            2 => Grp3Op::Not,
            3 => Grp3Op::Neg,
            4 => Grp3Op::Mul,
            5 => Grp3Op::Imul,
            6 => Grp3Op::Div,
            _ => Grp3Op::Idiv,
        }
    }
}

/// Group 5 sub-opcodes (0xFF).
pub const EXT5_INC: u8 = 0;
pub const EXT5_DEC: u8 = 1;
pub const EXT5_CALLN_Ev: u8 = 2;
pub const EXT5_CALLF_Ev: u8 = 3;
pub const EXT5_JMPN_Ev: u8 = 4;
pub const EXT5_JMPF_Ev: u8 = 5;
pub const EXT5_PUSH_Ev: u8 = 6;

/// Bit-test family (0F A3/AB/B3/BB and the /4../7 rows of 0F BA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtOp {
    Bt,
    Bts,
    Btr,
    Btc,
}

// ── Decode tables ───────────────────────────────────────────

/// Immediate operand class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    None,
    /// 8 bits.
    Ib,
    /// 16 bits.
    Iw,
    /// 16 bits with 0x66, else 32 (sign-extended under REX.W).
    Iz,
    /// Full operand width: 16, 32 or 64 bits (`B8+r`).
    Iv,
    /// 32-bit relative displacement regardless of operand size.
    Rel32,
    /// Absolute address: 64 bits, 32 with 0x67.
    Moffs,
    /// `ENTER`: 16 then 8 bits.
    IwIb,
    /// Depends on the ModR/M `reg` field (group 3).
    Grp3(u8),
}

/// Opcodes of the one-byte map that do not exist in 64-bit mode.
pub fn is_invalid_primary(op: u8) -> bool {
    matches!(
        op,
        0x06 | 0x07
            | 0x0E
            | 0x16
            | 0x17
            | 0x1E
            | 0x1F
            | 0x27
            | 0x2F
            | 0x37
            | 0x3F
            | 0x60
            | 0x61
            | 0x62
            | 0x82
            | 0x9A
            | 0xC4
            | 0xC5
            | 0xD4
            | 0xD5
            | 0xD6
            | 0xEA
    )
}

/// Undefined opcodes of the `0F` map.
pub fn is_invalid_0f(op: u8) -> bool {
    matches!(
        op,
        0x04 | 0x0A | 0x0C | 0x0E | 0x0F | 0x24..=0x27 | 0x36 | 0x39 | 0x3B..=0x3F | 0x7A | 0x7B
            | 0xA6 | 0xA7 | 0xFF
    )
}

pub fn has_modrm_primary(op: u8) -> bool {
    match op {
        0x00..=0x3F => op & 0x7 < 4,
        0x62 | 0x63 | 0x69 | 0x6B => true,
        0x80..=0x8F => true,
        0xC0 | 0xC1 | 0xC4..=0xC7 => true,
        0xD0..=0xD3 | 0xD8..=0xDF => true,
        0xF6 | 0xF7 | 0xFE | 0xFF => true,
        _ => false,
    }
}

pub fn has_modrm_0f(op: u8) -> bool {
    !matches!(
        op,
        0x05..=0x09 | 0x0B | 0x30..=0x37 | 0x77 | 0x80..=0x8F | 0xA0..=0xA2 | 0xA8..=0xAA | 0xC8..=0xCF
    )
}

pub fn imm_primary(op: u8) -> ImmKind {
    match op {
        0x00..=0x3F if op & 0x7 == 4 => ImmKind::Ib,
        0x00..=0x3F if op & 0x7 == 5 => ImmKind::Iz,
        0x68 | 0x69 | 0x81 | 0xA9 | 0xC7 => ImmKind::Iz,
        0x6A | 0x6B | 0x70..=0x7F | 0x80 | 0x83 => ImmKind::Ib,
        0xA8 | 0xB0..=0xB7 | 0xC0 | 0xC1 | 0xC6 | 0xCD => ImmKind::Ib,
        0xE0..=0xE7 | 0xEB => ImmKind::Ib,
        0xA0..=0xA3 => ImmKind::Moffs,
        0xB8..=0xBF => ImmKind::Iv,
        0xC2 | 0xCA => ImmKind::Iw,
        0xC8 => ImmKind::IwIb,
        0xE8 | 0xE9 => ImmKind::Rel32,
        0xF6 | 0xF7 => ImmKind::Grp3(op),
        _ => ImmKind::None,
    }
}

pub fn imm_0f(op: u8) -> ImmKind {
    match op {
        0x70..=0x73 | 0xA4 | 0xAC | 0xBA | 0xC2 | 0xC4..=0xC6 => ImmKind::Ib,
        0x80..=0x8F => ImmKind::Rel32,
        _ => ImmKind::None,
    }
}
