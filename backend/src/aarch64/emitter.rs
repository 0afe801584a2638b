//! A64 instruction encoders.
//!
//! `encode_*` functions are pure: they pack operands into one 32-bit
//! instruction word. `emit_*` functions push words through a
//! [`CodeBuffer`] and may expand into short sequences (immediate
//! materialization). None of them panic on buffer exhaustion; the buffer
//! records the overflow instead.

use thiserror::Error;

use super::cond::HostCond;
use super::regs::HostReg;
use crate::code_buffer::CodeBuffer;

/// Largest unsigned immediate of the ADD/SUB (immediate) forms.
pub const ADDSUB_IMM_MAX: u64 = 0xFFF;

/// Reach of B/BL: signed 26-bit word offset.
pub const B_RANGE: i64 = 1 << 27;
/// Reach of B.cond/CBZ: signed 19-bit word offset.
pub const BCOND_RANGE: i64 = 1 << 20;
/// Reach of TBZ/TBNZ: signed 14-bit word offset.
pub const TBZ_RANGE: i64 = 1 << 15;

pub const NOP: u32 = 0xD503_201F;
/// `B +4`: falls through to the next word. An unlinked chain site.
pub const B_NEXT: u32 = 0x1400_0001;
/// `RET` (through X30).
pub const RET: u32 = 0xD65F_03C0;

/// A relative branch displacement that the instruction cannot encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("branch displacement {disp:#x} not encodable (range ±{range:#x}, 4-byte aligned)")]
pub struct BranchRangeError {
    pub disp: i64,
    pub range: i64,
}

#[inline]
const fn sf_bit(sf: bool) -> u32 {
    (sf as u32) << 31
}

// -- Sub-operation enums --

/// ADD/SUB family, value is the `op:S` field (bits 30:29).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AddSubOp {
    Add = 0,
    Adds = 1,
    Sub = 2,
    Subs = 3,
}

impl AddSubOp {
    /// Same operation with flag setting turned on or off.
    pub const fn with_flags(self, flags: bool) -> AddSubOp {
        match (self, flags) {
            (AddSubOp::Add | AddSubOp::Adds, false) => AddSubOp::Add,
            (AddSubOp::Add | AddSubOp::Adds, true) => AddSubOp::Adds,
            (AddSubOp::Sub | AddSubOp::Subs, false) => AddSubOp::Sub,
            (AddSubOp::Sub | AddSubOp::Subs, true) => AddSubOp::Subs,
        }
    }

    /// ADD <-> SUB, keeping the flag-setting choice.
    pub const fn negated(self) -> AddSubOp {
        match self {
            AddSubOp::Add => AddSubOp::Sub,
            AddSubOp::Adds => AddSubOp::Subs,
            AddSubOp::Sub => AddSubOp::Add,
            AddSubOp::Subs => AddSubOp::Adds,
        }
    }

    pub const fn sets_flags(self) -> bool {
        (self as u32) & 1 != 0
    }
}

/// Shift applied to the second register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Shift {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

/// Logical (shifted register) family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Orr,
    Eor,
    Ands,
    /// AND NOT
    Bic,
    /// OR NOT
    Orn,
    /// XOR NOT
    Eon,
    Bics,
}

impl LogicOp {
    /// `(opc, N)` fields.
    const fn fields(self) -> (u32, u32) {
        match self {
            LogicOp::And => (0, 0),
            LogicOp::Orr => (1, 0),
            LogicOp::Eor => (2, 0),
            LogicOp::Ands => (3, 0),
            LogicOp::Bic => (0, 1),
            LogicOp::Orn => (1, 1),
            LogicOp::Eon => (2, 1),
            LogicOp::Bics => (3, 1),
        }
    }
}

/// Move wide family, value is the `opc` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MoveWideOp {
    Movn = 0,
    Movz = 2,
    Movk = 3,
}

/// Bitfield family, value is the `opc` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BitfieldOp {
    Sbfm = 0,
    Bfm = 1,
    Ubfm = 2,
}

/// Data-processing (2 source), value is the `opcode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Dp2Op {
    Udiv = 0x02,
    Sdiv = 0x03,
    Lslv = 0x08,
    Lsrv = 0x09,
    Asrv = 0x0A,
    Rorv = 0x0B,
}

/// Data-processing (1 source), value is the `opcode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Dp1Op {
    Rbit = 0x00,
    Rev16 = 0x01,
    /// REV on W registers, REV32 on X registers.
    Rev32 = 0x02,
    /// 64-bit REV; X registers only.
    Rev64 = 0x03,
    Clz = 0x04,
}

/// Data-processing (3 source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dp3Op {
    Madd,
    Msub,
    /// Signed 32x32 -> 64 multiply-add.
    Smaddl,
    /// Unsigned 32x32 -> 64 multiply-add.
    Umaddl,
    /// High half of a signed 64x64 multiply.
    Smulh,
    /// High half of an unsigned 64x64 multiply.
    Umulh,
}

/// Conditional select family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CselOp {
    Csel,
    Csinc,
    Csinv,
    Csneg,
}

/// Add/subtract with carry, value is the `op:S` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AdcOp {
    Adc = 0,
    Adcs = 1,
    Sbc = 2,
    Sbcs = 3,
}

/// Load/store kind, value is the `opc` field (bits 23:22).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LdStOp {
    Str = 0,
    Ldr = 1,
    /// Sign-extending load into an X register.
    LdrSxX = 2,
    /// Sign-extending load into a W register.
    LdrSxW = 3,
}

// -- Logical immediates --

/// A64 bitmask immediate in encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmaskImm {
    pub n: u32,
    pub immr: u32,
    pub imms: u32,
}

impl BitmaskImm {
    /// Encode `value` as a logical immediate for a 32-bit (`sf == false`)
    /// or 64-bit operation.
    ///
    /// A valid value is a rotated run of ones replicated across the
    /// register in elements of 2, 4, 8, 16, 32 or 64 bits. All-zeros and
    /// all-ones are not encodable.
    pub fn encode(value: u64, sf: bool) -> Option<BitmaskImm> {
        let value = if sf {
            value
        } else {
            if value >> 32 != 0 {
                return None;
            }
            value | (value << 32)
        };
        if value == 0 || value == u64::MAX {
            return None;
        }

        let mut size = 64u32;
        while size > 2 {
            let half = size / 2;
            let mask = (1u64 << half) - 1;
            if value & mask != (value >> half) & mask {
                break;
            }
            size = half;
        }

        let emask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
        let elem = value & emask;
        let ones = elem.count_ones();
        let run = (1u64 << ones) - 1;
        let immr = (0..size).find(|&r| rotate_right(run, r, size) == elem)?;
        let imms = ((!(size - 1) << 1) | (ones - 1)) & 0x3F;
        Some(BitmaskImm {
            n: (size == 64) as u32,
            immr,
            imms,
        })
    }

    /// Expand back to the register-width value.
    pub fn decode(self, sf: bool) -> Option<u64> {
        decode_bit_masks(self.n, self.immr, self.imms, sf)
    }
}

fn rotate_right(v: u64, r: u32, size: u32) -> u64 {
    if r == 0 {
        return v;
    }
    let emask = if size == 64 { u64::MAX } else { (1u64 << size) - 1 };
    ((v >> r) | (v << (size - r))) & emask
}

/// `DecodeBitMasks` for the `wmask` result.
pub fn decode_bit_masks(n: u32, immr: u32, imms: u32, sf: bool) -> Option<u64> {
    let combined = (n << 6) | (!imms & 0x3F);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 || (!sf && n != 0) {
        return None;
    }
    let size = 1u32 << len;
    let levels = size - 1;
    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }
    let welem = (1u64 << (s + 1)) - 1;
    let elem = rotate_right(welem, r, size);
    let mut out = 0u64;
    let mut pos = 0;
    while pos < 64 {
        out |= elem << pos;
        pos += size;
    }
    Some(if sf { out } else { out & 0xFFFF_FFFF })
}

// ── Pure encoders ───────────────────────────────────────────

pub const fn encode_addsub_reg(
    op: AddSubOp,
    sf: bool,
    rd: HostReg,
    rn: HostReg,
    rm: HostReg,
    shift: Shift,
    amount: u32,
) -> u32 {
    sf_bit(sf)
        | 0x0B00_0000
        | (op as u32) << 29
        | (shift as u32) << 22
        | rm.enc() << 16
        | (amount & 0x3F) << 10
        | rn.enc() << 5
        | rd.enc()
}

/// `ADD Xd, Xn, Xm` (no flags, 64-bit).
pub const fn encode_add(rd: HostReg, rn: HostReg, rm: HostReg) -> u32 {
    encode_addsub_reg(AddSubOp::Add, true, rd, rn, rm, Shift::Lsl, 0)
}

/// ADD/SUB (immediate). `imm12` must be at most [`ADDSUB_IMM_MAX`];
/// `lsl12` shifts it left by 12.
pub const fn encode_addsub_imm(
    op: AddSubOp,
    sf: bool,
    rd: HostReg,
    rn: HostReg,
    imm12: u32,
    lsl12: bool,
) -> u32 {
    sf_bit(sf)
        | 0x1100_0000
        | (op as u32) << 29
        | (lsl12 as u32) << 22
        | (imm12 & 0xFFF) << 10
        | rn.enc() << 5
        | rd.enc()
}

pub const fn encode_logic_reg(
    op: LogicOp,
    sf: bool,
    rd: HostReg,
    rn: HostReg,
    rm: HostReg,
    shift: Shift,
    amount: u32,
) -> u32 {
    let (opc, n) = op.fields();
    sf_bit(sf)
        | 0x0A00_0000
        | opc << 29
        | (shift as u32) << 22
        | n << 21
        | rm.enc() << 16
        | (amount & 0x3F) << 10
        | rn.enc() << 5
        | rd.enc()
}

/// Logical (immediate). Only `And`, `Orr`, `Eor`, `Ands` have an
/// immediate form; the inverted ops encode as their base op.
pub const fn encode_logic_imm(op: LogicOp, sf: bool, rd: HostReg, rn: HostReg, imm: BitmaskImm) -> u32 {
    let (opc, _) = op.fields();
    sf_bit(sf)
        | 0x1200_0000
        | opc << 29
        | (imm.n & 1) << 22
        | (imm.immr & 0x3F) << 16
        | (imm.imms & 0x3F) << 10
        | rn.enc() << 5
        | rd.enc()
}

/// `MOV Rd, Rm` (ORR with the zero register).
pub const fn encode_mov(sf: bool, rd: HostReg, rm: HostReg) -> u32 {
    encode_logic_reg(LogicOp::Orr, sf, rd, HostReg::Zr, rm, Shift::Lsl, 0)
}

pub const fn encode_movw(op: MoveWideOp, sf: bool, rd: HostReg, imm16: u32, hw: u32) -> u32 {
    sf_bit(sf) | 0x1280_0000 | (op as u32) << 29 | (hw & 3) << 21 | (imm16 & 0xFFFF) << 5 | rd.enc()
}

pub const fn encode_bitfield(
    op: BitfieldOp,
    sf: bool,
    rd: HostReg,
    rn: HostReg,
    immr: u32,
    imms: u32,
) -> u32 {
    sf_bit(sf)
        | (sf as u32) << 22
        | 0x1300_0000
        | (op as u32) << 29
        | (immr & 0x3F) << 16
        | (imms & 0x3F) << 10
        | rn.enc() << 5
        | rd.enc()
}

/// `LSL Rd, Rn, #shift` (UBFM alias).
pub const fn encode_lsl_imm(sf: bool, rd: HostReg, rn: HostReg, shift: u32) -> u32 {
    let size = if sf { 64 } else { 32 };
    let shift = shift % size;
    encode_bitfield(BitfieldOp::Ubfm, sf, rd, rn, (size - shift) % size, size - 1 - shift)
}

/// `LSR Rd, Rn, #shift` (UBFM alias).
pub const fn encode_lsr_imm(sf: bool, rd: HostReg, rn: HostReg, shift: u32) -> u32 {
    let size = if sf { 64 } else { 32 };
    encode_bitfield(BitfieldOp::Ubfm, sf, rd, rn, shift % size, size - 1)
}

/// `ASR Rd, Rn, #shift` (SBFM alias).
pub const fn encode_asr_imm(sf: bool, rd: HostReg, rn: HostReg, shift: u32) -> u32 {
    let size = if sf { 64 } else { 32 };
    encode_bitfield(BitfieldOp::Sbfm, sf, rd, rn, shift % size, size - 1)
}

/// `BFI Rd, Rn, #lsb, #width`: insert the low `width` bits of `rn`.
pub const fn encode_bfi(sf: bool, rd: HostReg, rn: HostReg, lsb: u32, width: u32) -> u32 {
    let size = if sf { 64 } else { 32 };
    encode_bitfield(BitfieldOp::Bfm, sf, rd, rn, (size - lsb) % size, width - 1)
}

/// `UBFX Rd, Rn, #lsb, #width`: extract `width` bits starting at `lsb`.
pub const fn encode_ubfx(sf: bool, rd: HostReg, rn: HostReg, lsb: u32, width: u32) -> u32 {
    encode_bitfield(BitfieldOp::Ubfm, sf, rd, rn, lsb, lsb + width - 1)
}

/// `SBFX Rd, Rn, #lsb, #width`.
pub const fn encode_sbfx(sf: bool, rd: HostReg, rn: HostReg, lsb: u32, width: u32) -> u32 {
    encode_bitfield(BitfieldOp::Sbfm, sf, rd, rn, lsb, lsb + width - 1)
}

/// `EXTR Rd, Rn, Rm, #lsb`: bits `lsb..lsb+size` of the pair `Rn:Rm`.
pub const fn encode_extr(sf: bool, rd: HostReg, rn: HostReg, rm: HostReg, lsb: u32) -> u32 {
    sf_bit(sf)
        | (sf as u32) << 22
        | 0x1380_0000
        | rm.enc() << 16
        | (lsb & 0x3F) << 10
        | rn.enc() << 5
        | rd.enc()
}

pub const fn encode_dp2(op: Dp2Op, sf: bool, rd: HostReg, rn: HostReg, rm: HostReg) -> u32 {
    sf_bit(sf) | 0x1AC0_0000 | rm.enc() << 16 | (op as u32) << 10 | rn.enc() << 5 | rd.enc()
}

pub const fn encode_dp1(op: Dp1Op, sf: bool, rd: HostReg, rn: HostReg) -> u32 {
    sf_bit(sf) | 0x5AC0_0000 | (op as u32) << 10 | rn.enc() << 5 | rd.enc()
}

/// `CRC32C{B,H,W,X} Wd, Wn, Rm`; `log2_bytes` selects the data width.
pub const fn encode_crc32c(log2_bytes: u32, rd: HostReg, rn: HostReg, rm: HostReg) -> u32 {
    let sz = log2_bytes & 3;
    sf_bit(sz == 3) | 0x1AC0_5000 | rm.enc() << 16 | sz << 10 | rn.enc() << 5 | rd.enc()
}

/// Data-processing (3 source). `sf` only applies to MADD/MSUB; the
/// widening and high-half forms are 64-bit by definition.
pub const fn encode_dp3(op: Dp3Op, sf: bool, rd: HostReg, rn: HostReg, rm: HostReg, ra: HostReg) -> u32 {
    let base = match op {
        Dp3Op::Madd => sf_bit(sf) | 0x1B00_0000,
        Dp3Op::Msub => sf_bit(sf) | 0x1B00_8000,
        Dp3Op::Smaddl => 0x9B20_0000,
        Dp3Op::Umaddl => 0x9BA0_0000,
        Dp3Op::Smulh => 0x9B40_0000,
        Dp3Op::Umulh => 0x9BC0_0000,
    };
    base | rm.enc() << 16 | ra.enc() << 10 | rn.enc() << 5 | rd.enc()
}

/// `MUL Rd, Rn, Rm` (MADD with the zero register).
pub const fn encode_mul(sf: bool, rd: HostReg, rn: HostReg, rm: HostReg) -> u32 {
    encode_dp3(Dp3Op::Madd, sf, rd, rn, rm, HostReg::Zr)
}

pub const fn encode_csel(
    op: CselOp,
    sf: bool,
    rd: HostReg,
    rn: HostReg,
    rm: HostReg,
    cond: HostCond,
) -> u32 {
    let base = match op {
        CselOp::Csel => 0x1A80_0000,
        CselOp::Csinc => 0x1A80_0400,
        CselOp::Csinv => 0x5A80_0000,
        CselOp::Csneg => 0x5A80_0400,
    };
    sf_bit(sf) | base | rm.enc() << 16 | cond.bits() << 12 | rn.enc() << 5 | rd.enc()
}

/// `CSET Rd, cond` (CSINC Rd, ZR, ZR, !cond).
pub const fn encode_cset(sf: bool, rd: HostReg, cond: HostCond) -> u32 {
    encode_csel(CselOp::Csinc, sf, rd, HostReg::Zr, HostReg::Zr, cond.invert())
}

pub const fn encode_adc(op: AdcOp, sf: bool, rd: HostReg, rn: HostReg, rm: HostReg) -> u32 {
    sf_bit(sf) | 0x1A00_0000 | (op as u32) << 29 | rm.enc() << 16 | rn.enc() << 5 | rd.enc()
}

// -- Loads and stores --

/// Unsigned scaled offset: `[Xn, #imm12 << size]`.
pub const fn encode_ldst_uimm(op: LdStOp, log2_size: u32, rt: HostReg, rn: HostReg, imm12: u32) -> u32 {
    (log2_size & 3) << 30 | 0x3900_0000 | (op as u32) << 22 | (imm12 & 0xFFF) << 10 | rn.enc() << 5 | rt.enc()
}

const fn ldst_imm9(op: LdStOp, log2_size: u32, rt: HostReg, rn: HostReg, imm9: i32, mode: u32) -> u32 {
    (log2_size & 3) << 30
        | 0x3800_0000
        | (op as u32) << 22
        | ((imm9 as u32) & 0x1FF) << 12
        | mode << 10
        | rn.enc() << 5
        | rt.enc()
}

/// Unscaled signed offset (LDUR/STUR): `[Xn, #imm9]`.
pub const fn encode_ldst_unscaled(op: LdStOp, log2_size: u32, rt: HostReg, rn: HostReg, imm9: i32) -> u32 {
    ldst_imm9(op, log2_size, rt, rn, imm9, 0)
}

/// Post-index: access `[Xn]`, then `Xn += imm9`.
pub const fn encode_ldst_post(op: LdStOp, log2_size: u32, rt: HostReg, rn: HostReg, imm9: i32) -> u32 {
    ldst_imm9(op, log2_size, rt, rn, imm9, 1)
}

/// Pre-index: `Xn += imm9`, then access `[Xn]`.
pub const fn encode_ldst_pre(op: LdStOp, log2_size: u32, rt: HostReg, rn: HostReg, imm9: i32) -> u32 {
    ldst_imm9(op, log2_size, rt, rn, imm9, 3)
}

// -- Branches --

const fn check_disp(disp: i64, range: i64) -> Result<i64, BranchRangeError> {
    if disp % 4 != 0 || disp < -range || disp >= range {
        Err(BranchRangeError { disp, range })
    } else {
        Ok(disp >> 2)
    }
}

/// `B` to a byte displacement from the branch itself.
pub const fn encode_b(disp: i64) -> Result<u32, BranchRangeError> {
    match check_disp(disp, B_RANGE) {
        Ok(words) => Ok(0x1400_0000 | (words as u32 & 0x03FF_FFFF)),
        Err(e) => Err(e),
    }
}

/// `B.cond` to a byte displacement from the branch itself.
pub const fn encode_b_cond(cond: HostCond, disp: i64) -> Result<u32, BranchRangeError> {
    match check_disp(disp, BCOND_RANGE) {
        Ok(words) => Ok(0x5400_0000 | (words as u32 & 0x7FFFF) << 5 | cond.bits()),
        Err(e) => Err(e),
    }
}

/// `CBZ`/`CBNZ Rt, disp`.
pub const fn encode_cbz(sf: bool, nonzero: bool, rt: HostReg, disp: i64) -> Result<u32, BranchRangeError> {
    match check_disp(disp, BCOND_RANGE) {
        Ok(words) => Ok(sf_bit(sf)
            | 0x3400_0000
            | (nonzero as u32) << 24
            | (words as u32 & 0x7FFFF) << 5
            | rt.enc()),
        Err(e) => Err(e),
    }
}

/// `TBZ`/`TBNZ Rt, #bit, disp`.
pub const fn encode_tbz(nonzero: bool, rt: HostReg, bit: u32, disp: i64) -> Result<u32, BranchRangeError> {
    match check_disp(disp, TBZ_RANGE) {
        Ok(words) => Ok(((bit >> 5) & 1) << 31
            | 0x3600_0000
            | (nonzero as u32) << 24
            | (bit & 0x1F) << 19
            | (words as u32 & 0x3FFF) << 5
            | rt.enc()),
        Err(e) => Err(e),
    }
}

pub const fn encode_br(rn: HostReg) -> u32 {
    0xD61F_0000 | rn.enc() << 5
}

pub const fn encode_blr(rn: HostReg) -> u32 {
    0xD63F_0000 | rn.enc() << 5
}

/// `RET` through the link register: the dispatch-returning terminator.
pub const fn encode_return() -> u32 {
    RET
}

pub const fn encode_nop() -> u32 {
    NOP
}

pub const fn encode_brk(imm16: u32) -> u32 {
    0xD420_0000 | (imm16 & 0xFFFF) << 5
}

/// `MRS Xt, CNTVCT_EL0`.
pub const fn encode_mrs_cntvct(rt: HostReg) -> u32 {
    0xD53B_E040 | rt.enc()
}

/// `MRS Xt, NZCV`: flags land in bits 31..28 of `rt`.
pub const fn encode_mrs_nzcv(rt: HostReg) -> u32 {
    0xD53B_4200 | rt.enc()
}

/// `MSR NZCV, Xt`: loads the flags from bits 31..28 of `rt`.
pub const fn encode_msr_nzcv(rt: HostReg) -> u32 {
    0xD51B_4200 | rt.enc()
}

/// Bit of the C flag in the NZCV register layout.
pub const NZCV_C_BIT: u32 = 29;

/// Logical immediate selecting the C flag of a 64-bit NZCV value.
pub const NZCV_C_MASK: BitmaskImm = BitmaskImm {
    n: 1,
    immr: 64 - NZCV_C_BIT,
    imms: 0,
};

// ── Emitters ────────────────────────────────────────────────

#[inline]
pub fn emit(buf: &mut CodeBuffer, word: u32) {
    buf.emit_u32(word);
}

pub fn emit_mov(buf: &mut CodeBuffer, sf: bool, rd: HostReg, rm: HostReg) {
    buf.emit_u32(encode_mov(sf, rd, rm));
}

/// Materialize a constant into `rd`.
///
/// Picks the shortest of: a single ORR with a bitmask immediate, a
/// MOVZ/MOVK chain over the non-zero halfwords, or a MOVN/MOVK chain
/// over the non-0xFFFF halfwords.
pub fn emit_movi(buf: &mut CodeBuffer, sf: bool, rd: HostReg, value: u64) {
    let value = if sf { value } else { value & 0xFFFF_FFFF };
    let halves: u32 = if sf { 4 } else { 2 };
    let hw = |i: u32| ((value >> (i * 16)) & 0xFFFF) as u32;

    let zero_halves = (0..halves).filter(|&i| hw(i) == 0).count() as u32;
    let ones_halves = (0..halves).filter(|&i| hw(i) == 0xFFFF).count() as u32;

    if value == 0 {
        buf.emit_u32(encode_movw(MoveWideOp::Movz, sf, rd, 0, 0));
        return;
    }
    if ones_halves < halves - 1 && zero_halves < halves - 1 {
        if let Some(imm) = BitmaskImm::encode(value, sf) {
            buf.emit_u32(encode_logic_imm(LogicOp::Orr, sf, rd, HostReg::Zr, imm));
            return;
        }
    }

    if ones_halves > zero_halves {
        let mut first = true;
        for i in 0..halves {
            let h = hw(i);
            if h == 0xFFFF {
                continue;
            }
            if first {
                buf.emit_u32(encode_movw(MoveWideOp::Movn, sf, rd, !h & 0xFFFF, i));
                first = false;
            } else {
                buf.emit_u32(encode_movw(MoveWideOp::Movk, sf, rd, h, i));
            }
        }
        if first {
            // All halfwords 0xFFFF.
            buf.emit_u32(encode_movw(MoveWideOp::Movn, sf, rd, 0, 0));
        }
    } else {
        let mut first = true;
        for i in 0..halves {
            let h = hw(i);
            if h == 0 {
                continue;
            }
            let op = if first { MoveWideOp::Movz } else { MoveWideOp::Movk };
            buf.emit_u32(encode_movw(op, sf, rd, h, i));
            first = false;
        }
    }
}

/// Worst-case number of words [`emit_movi`] produces.
pub const MOVI_MAX_WORDS: usize = 4;

/// `rd = rn +/- imm` for any immediate, using `scratch` when the value
/// does not fit the immediate field. `op` decides flag setting.
pub fn emit_addsub_imm(
    buf: &mut CodeBuffer,
    op: AddSubOp,
    sf: bool,
    rd: HostReg,
    rn: HostReg,
    imm: i64,
    scratch: HostReg,
) {
    // The most negative value has no positive counterpart at this width.
    let (imm, min) = if sf {
        (imm, i64::MIN)
    } else {
        (imm as i32 as i64, i32::MIN as i64)
    };
    let (op, mag) = if imm < 0 && imm != min {
        (op.negated(), imm.unsigned_abs())
    } else {
        (op, imm as u64)
    };
    let mag = if sf { mag } else { mag & 0xFFFF_FFFF };
    if mag <= ADDSUB_IMM_MAX {
        buf.emit_u32(encode_addsub_imm(op, sf, rd, rn, mag as u32, false));
    } else if mag & 0xFFF == 0 && mag >> 12 <= ADDSUB_IMM_MAX {
        buf.emit_u32(encode_addsub_imm(op, sf, rd, rn, (mag >> 12) as u32, true));
    } else {
        emit_movi(buf, sf, scratch, mag);
        buf.emit_u32(encode_addsub_reg(op, sf, rd, rn, scratch, Shift::Lsl, 0));
    }
}

/// Load or store `rt` at `[rn + offset]`, choosing the scaled,
/// unscaled or register-offset form. `scratch` must differ from `rn`
/// and `rt` when the offset does not fit an immediate form.
pub fn emit_ldst(
    buf: &mut CodeBuffer,
    op: LdStOp,
    log2_size: u32,
    rt: HostReg,
    rn: HostReg,
    offset: i64,
    scratch: HostReg,
) {
    let scale = 1i64 << log2_size;
    if offset >= 0 && offset % scale == 0 && offset / scale <= 0xFFF {
        buf.emit_u32(encode_ldst_uimm(op, log2_size, rt, rn, (offset / scale) as u32));
    } else if (-256..256).contains(&offset) {
        buf.emit_u32(encode_ldst_unscaled(op, log2_size, rt, rn, offset as i32));
    } else {
        emit_addsub_imm(buf, AddSubOp::Add, true, scratch, rn, offset, scratch);
        buf.emit_u32(encode_ldst_uimm(op, log2_size, rt, scratch, 0));
    }
}
