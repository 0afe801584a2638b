//! x86-64 instruction length decoder.
//!
//! Produces a fully populated [`Insn`] or an error; never a partial
//! record. Only the 64-bit code segment is modelled.

use dbt_core::{
    Displacement, Immediate, Insn, ModRm, OpcodeMap, Prefixes, Sib, MAX_INSN_LEN,
};
use thiserror::Error;

use super::opcodes::{
    has_modrm_0f, has_modrm_primary, imm_0f, imm_primary, is_invalid_0f, is_invalid_primary,
    ImmKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes end before the instruction does.
    #[error("instruction truncated")]
    Truncated,
    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u32),
    /// More than 15 bytes would be needed.
    #[error("instruction longer than {MAX_INSN_LEN} bytes")]
    TooLong,
}

const REX_W: u8 = 0x8;
const REX_R: u8 = 0x4;
const REX_X: u8 = 0x2;
const REX_B: u8 = 0x1;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Result<u8, DecodeError> {
        if self.pos >= MAX_INSN_LEN {
            return Err(DecodeError::TooLong);
        }
        self.bytes.get(self.pos).copied().ok_or(DecodeError::Truncated)
    }

    fn next(&mut self) -> Result<u8, DecodeError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    /// Little-endian value of `n` bytes.
    fn le(&mut self, n: u8) -> Result<u64, DecodeError> {
        let mut v = 0u64;
        for i in 0..n {
            v |= (self.next()? as u64) << (8 * i);
        }
        Ok(v)
    }
}

/// Decode one instruction from `bytes`, located at guest address `addr`.
///
/// `Insn::len` of the result is the number of bytes consumed.
pub fn decode(bytes: &[u8], addr: u64) -> Result<Insn, DecodeError> {
    let mut c = Cursor { bytes, pos: 0 };

    // Legacy prefixes and REX. A REX byte only counts when it is the
    // last prefix before the opcode.
    let mut prefixes = Prefixes::empty();
    let mut rex = 0u8;
    loop {
        let b = c.peek()?;
        if let Some(p) = Prefixes::from_byte(b) {
            prefixes |= p;
            rex = 0;
        } else if b & 0xF0 == 0x40 {
            rex = b;
        } else {
            break;
        }
        c.pos += 1;
    }

    let mut map = OpcodeMap::Primary;
    let mut opcode = c.next()?;
    if opcode == 0x0F {
        opcode = c.next()?;
        match opcode {
            0x38 => {
                map = OpcodeMap::Ext0F38;
                opcode = c.next()?;
            }
            0x3A => {
                map = OpcodeMap::Ext0F3A;
                opcode = c.next()?;
            }
            _ => map = OpcodeMap::Ext0F,
        }
    }

    let (has_modrm, imm_kind) = match map {
        OpcodeMap::Primary => {
            if is_invalid_primary(opcode) {
                return Err(DecodeError::InvalidOpcode(opcode as u32));
            }
            (has_modrm_primary(opcode), imm_primary(opcode))
        }
        OpcodeMap::Ext0F => {
            if is_invalid_0f(opcode) {
                return Err(DecodeError::InvalidOpcode(0x0F00 | opcode as u32));
            }
            (has_modrm_0f(opcode), imm_0f(opcode))
        }
        OpcodeMap::Ext0F38 => (true, ImmKind::None),
        OpcodeMap::Ext0F3A => (true, ImmKind::Ib),
    };

    let mut modrm = None;
    let mut sib = None;
    let mut disp = Displacement::default();
    if has_modrm {
        let b = c.next()?;
        let m = ModRm {
            mode: b >> 6,
            reg: ((b >> 3) & 7) | if rex & REX_R != 0 { 8 } else { 0 },
            rm: (b & 7) | if rex & REX_B != 0 { 8 } else { 0 },
        };
        let mut disp_width = match m.mode {
            1 => 1,
            2 => 4,
            0 if b & 7 == 5 => 4,
            _ => 0,
        };
        if m.mode != 3 && b & 7 == 4 {
            let s = c.next()?;
            let index3 = (s >> 3) & 7;
            let base3 = s & 7;
            sib = Some(Sib {
                scale: s >> 6,
                index: if index3 == 4 && rex & REX_X == 0 {
                    None
                } else {
                    Some(index3 | if rex & REX_X != 0 { 8 } else { 0 })
                },
                base: if m.mode == 0 && base3 == 5 {
                    disp_width = 4;
                    None
                } else {
                    Some(base3 | if rex & REX_B != 0 { 8 } else { 0 })
                },
            });
        }
        if disp_width != 0 {
            let raw = c.le(disp_width)?;
            let value = if disp_width == 1 {
                raw as u8 as i8 as i32
            } else {
                raw as u32 as i32
            };
            disp = Displacement {
                value,
                width: disp_width,
            };
        }
        modrm = Some(m);
    }

    let opsize = prefixes.contains(Prefixes::OPSIZE);
    let rex_w = rex & REX_W != 0;
    let iz = if opsize && !rex_w { 2 } else { 4 };
    let mut imm = Immediate::default();
    let width = match imm_kind {
        ImmKind::None => 0,
        ImmKind::Ib => 1,
        ImmKind::Iw => 2,
        ImmKind::Iz => iz,
        ImmKind::Iv => {
            if rex_w {
                8
            } else {
                iz
            }
        }
        ImmKind::Rel32 => 4,
        ImmKind::Moffs => {
            if prefixes.contains(Prefixes::ADDRSIZE) {
                4
            } else {
                8
            }
        }
        ImmKind::IwIb => {
            // ENTER: frame size then nesting level, packed low to high.
            let v = c.le(3)?;
            imm = Immediate { value: v, width: 3 };
            0
        }
        ImmKind::Grp3(op) => match modrm.map(|m| m.reg & 7) {
            Some(0 | 1) if op == 0xF6 => 1,
            Some(0 | 1) => iz,
            _ => 0,
        },
    };
    if width != 0 {
        imm = Immediate {
            value: c.le(width)?,
            width,
        };
    }

    Ok(Insn {
        addr,
        map,
        opcode,
        prefixes,
        rex,
        modrm,
        sib,
        disp,
        imm,
        len: c.pos as u8,
    })
}
