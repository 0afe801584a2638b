//! Instruction classification.
//!
//! Each category has a pure predicate over the decoded record; the
//! classifier tries them in [`Category::PRIORITY`] order and the first
//! match wins.

use dbt_core::{Category, Insn};

use crate::x86_64::opcodes::*;

type Predicate = fn(&Insn) -> bool;

/// Category predicates in priority order.
const PREDICATES: [(Category, Predicate); 6] = [
    (Category::Arith, is_arith),
    (Category::Memory, is_memory),
    (Category::ControlFlow, is_control_flow),
    (Category::Bit, is_bit),
    (Category::String, is_string),
    (Category::Misc, is_misc),
];

pub fn classify(insn: &Insn) -> Category {
    PREDICATES
        .iter()
        .find(|(_, pred)| pred(insn))
        .map_or(Category::Unknown, |&(cat, _)| cat)
}

#[inline]
fn ext_in(insn: &Insn, range: std::ops::RangeInclusive<u8>) -> bool {
    insn.ext().is_some_and(|e| range.contains(&e))
}

/// Integer arithmetic, logic, shifts, multiply/divide, compare and test.
pub fn is_arith(insn: &Insn) -> bool {
    match opc(insn) {
        k @ 0x00..=0x3D => k & 7 < 6,
        OPC_ARITH_EbIb | OPC_ARITH_EvIz | OPC_ARITH_EvIb => true,
        OPC_TESTB | OPC_TESTL | OPC_TESTB_AL | OPC_TESTL_EAX => true,
        OPC_GRP3_Eb | OPC_GRP3_Ev => true,
        OPC_GRP4 | OPC_GRP5 => ext_in(insn, EXT5_INC..=EXT5_DEC),
        OPC_SHIFTB_Ib | OPC_SHIFT_Ib | OPC_SHIFTB_1 | OPC_SHIFT_1 | OPC_SHIFTB_cl | OPC_SHIFT_cl => {
            true
        }
        OPC_IMUL_GvEv | OPC_IMUL_GvEvIz | OPC_IMUL_GvEvIb => true,
        _ => false,
    }
}

/// Moves, extensions, LEA, stack push/pop and exchanges.
pub fn is_memory(insn: &Insn) -> bool {
    match opc(insn) {
        OPC_MOVB_EvGv | OPC_MOVL_EvGv | OPC_MOVB_GvEv | OPC_MOVL_GvEv => true,
        OPC_LEA => true,
        OPC_MOVB_EvIb | OPC_MOVL_EvIz => ext_in(insn, 0..=0),
        0xB0..=0xBF => true,
        OPC_MOVB_AL_Ob | OPC_MOVL_EAX_Ov | OPC_MOVB_Ob_AL | OPC_MOVL_Ov_EAX => true,
        0x50..=0x5F => true,
        OPC_PUSH_Iz | OPC_PUSH_Ib => true,
        OPC_POP_Ev => ext_in(insn, 0..=0),
        OPC_GRP5 => ext_in(insn, EXT5_PUSH_Ev..=EXT5_PUSH_Ev),
        OPC_XCHGB_EvGv | OPC_XCHG_EvGv => true,
        0x91..=0x97 => true,
        // 90 is NOP unless REX.B turns it into XCHG rAX, r8.
        OPC_XCHG_ax_r => insn.rex & 1 != 0,
        OPC_MOVZBL | OPC_MOVZWL | OPC_MOVSBL | OPC_MOVSWL => true,
        OPC_MOVSLQ => true,
        _ => false,
    }
}

/// Branches, calls, returns and the flag-consuming moves and sets.
pub fn is_control_flow(insn: &Insn) -> bool {
    match opc(insn) {
        0x70..=0x7F => true,
        OPC_JMP_short | OPC_JMP_long | OPC_CALL_Jz | OPC_RET | OPC_RET_Iw => true,
        OPC_LOOPNE | OPC_LOOPE | OPC_LOOP | OPC_JRCXZ => true,
        OPC_GRP5 => insn.ext() == Some(EXT5_CALLN_Ev) || insn.ext() == Some(EXT5_JMPN_Ev),
        k => {
            (OPC_JCC_long..OPC_JCC_long + 16).contains(&k)
                || (OPC_CMOVCC..OPC_CMOVCC + 16).contains(&k)
                || (OPC_SETCC..OPC_SETCC + 16).contains(&k)
        }
    }
}

/// Bit scans and counts, bit tests, byte swap, double shifts and CRC32.
pub fn is_bit(insn: &Insn) -> bool {
    match opc(insn) {
        OPC_BSF | OPC_BSR | OPC_POPCNT => true,
        OPC_BT | OPC_BTS | OPC_BTR | OPC_BTC => true,
        OPC_GRPBT => ext_in(insn, 4..=7),
        k if (OPC_BSWAP..OPC_BSWAP + 8).contains(&k) => true,
        OPC_SHLD_Ib | OPC_SHLD_cl | OPC_SHRD_Ib | OPC_SHRD_cl => true,
        OPC_CRC32_Eb | OPC_CRC32_Ev => true,
        _ => false,
    }
}

/// MOVS/CMPS/STOS/LODS/SCAS in every width.
pub fn is_string(insn: &Insn) -> bool {
    matches!(
        opc(insn),
        OPC_MOVSB
            | OPC_MOVS
            | OPC_CMPSB
            | OPC_CMPS
            | OPC_STOSB
            | OPC_STOS
            | OPC_LODSB
            | OPC_LODS
            | OPC_SCASB
            | OPC_SCAS
    )
}

/// NOPs, rAX sign extension, flag-control and system instructions.
pub fn is_misc(insn: &Insn) -> bool {
    matches!(
        opc(insn),
        OPC_NOP
            | OPC_NOP_Ev
            | OPC_CWDE
            | OPC_CDQ
            | OPC_HLT
            | OPC_CLI
            | OPC_STI
            | OPC_CLD
            | OPC_STD
            | OPC_INT3
            | OPC_INT_Ib
            | OPC_SYSCALL
            | OPC_UD2
            | OPC_RDTSC
            | OPC_CPUID
    )
}

/// Whether `insn` ends a basic block: every control transfer and every
/// instruction that leaves translated code.
pub fn is_terminator(insn: &Insn) -> bool {
    match opc(insn) {
        0x70..=0x7F => true,
        OPC_JMP_short | OPC_JMP_long | OPC_CALL_Jz => true,
        OPC_RET | OPC_RET_Iw | 0xCA | 0xCB | 0xCF => true,
        OPC_LOOPNE | OPC_LOOPE | OPC_LOOP | OPC_JRCXZ => true,
        OPC_GRP5 => ext_in(insn, EXT5_CALLN_Ev..=EXT5_JMPF_Ev),
        OPC_INT3 | OPC_INT_Ib | OPC_HLT => true,
        OPC_SYSCALL | OPC_UD2 | OPC_CPUID => true,
        // SYSRET, SYSENTER, SYSEXIT
        k if k == (0x07 | P_EXT) || k == (0x34 | P_EXT) || k == (0x35 | P_EXT) => true,
        k => (OPC_JCC_long..OPC_JCC_long + 16).contains(&k),
    }
}
