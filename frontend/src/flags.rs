//! Guest flags liveness.
//!
//! A backward pass over the decoded block decides, per instruction,
//! whether the flags it leaves behind are read before the next full
//! write. Handlers only emit flag-setting host forms when they are.

use dbt_core::Insn;

use crate::x86_64::opcodes::*;

/// How an instruction interacts with the arithmetic flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagEffect {
    pub reads: bool,
    pub writes: bool,
    /// Writes every flag but CF, which passes through (INC, DEC).
    pub keeps_carry: bool,
}

impl FlagEffect {
    const NONE: FlagEffect = FlagEffect {
        reads: false,
        writes: false,
        keeps_carry: false,
    };
    const WRITE: FlagEffect = FlagEffect {
        reads: false,
        writes: true,
        keeps_carry: false,
    };
    const WRITE_KEEP_CARRY: FlagEffect = FlagEffect {
        reads: false,
        writes: true,
        keeps_carry: true,
    };
    const READ: FlagEffect = FlagEffect {
        reads: true,
        writes: false,
        keeps_carry: false,
    };
    const READ_WRITE: FlagEffect = FlagEffect {
        reads: true,
        writes: true,
        keeps_carry: false,
    };
}

fn arith_effect(op: ArithOp) -> FlagEffect {
    match op {
        ArithOp::Adc | ArithOp::Sbb => FlagEffect::READ_WRITE,
        _ => FlagEffect::WRITE,
    }
}

/// Shift effect for a given count source. A zero count leaves the
/// flags untouched; a count in CL may be zero at run time.
fn shift_effect(op: ShiftOp, count: Option<u8>, wide: bool) -> FlagEffect {
    let mask = if wide { 63 } else { 31 };
    match op {
        ShiftOp::Rol | ShiftOp::Ror => FlagEffect::NONE,
        ShiftOp::Rcl | ShiftOp::Rcr => FlagEffect::READ_WRITE,
        _ => match count {
            None => FlagEffect::READ_WRITE,
            Some(n) if n & mask == 0 => FlagEffect::NONE,
            Some(_) => FlagEffect::WRITE,
        },
    }
}

/// Flag reads and writes of one instruction.
pub fn flag_effect(insn: &Insn) -> FlagEffect {
    let key = opc(insn);
    let ext = insn.ext().unwrap_or(0);
    match key {
        0x00..=0x3D if key & 7 < 6 => arith_effect(ArithOp::from_ext((key >> 3) as u8)),
        OPC_ARITH_EbIb | OPC_ARITH_EvIz | OPC_ARITH_EvIb => arith_effect(ArithOp::from_ext(ext)),
        OPC_TESTB | OPC_TESTL | OPC_TESTB_AL | OPC_TESTL_EAX => FlagEffect::WRITE,
        OPC_GRP3_Eb | OPC_GRP3_Ev => match Grp3Op::from_ext(ext) {
            Grp3Op::Not => FlagEffect::NONE,
            _ => FlagEffect::WRITE,
        },
        OPC_GRP4 | OPC_GRP5 if ext <= EXT5_DEC => FlagEffect::WRITE_KEEP_CARRY,
        OPC_SHIFTB_Ib | OPC_SHIFT_Ib => shift_effect(
            ShiftOp::from_ext(ext),
            Some(insn.imm.value as u8),
            insn.rex_w(),
        ),
        OPC_SHIFTB_1 | OPC_SHIFT_1 => shift_effect(ShiftOp::from_ext(ext), Some(1), insn.rex_w()),
        OPC_SHIFTB_cl | OPC_SHIFT_cl => shift_effect(ShiftOp::from_ext(ext), None, insn.rex_w()),
        OPC_IMUL_GvEv | OPC_IMUL_GvEvIz | OPC_IMUL_GvEvIb => FlagEffect::WRITE,
        OPC_BSF | OPC_BSR | OPC_POPCNT => FlagEffect::WRITE,
        OPC_BT | OPC_BTS | OPC_BTR | OPC_BTC => FlagEffect::WRITE,
        OPC_GRPBT if ext >= 4 => FlagEffect::WRITE,
        OPC_SHLD_Ib | OPC_SHRD_Ib => {
            let mask = if insn.rex_w() { 63 } else { 31 };
            if insn.imm.value & mask == 0 {
                FlagEffect::NONE
            } else {
                FlagEffect::WRITE
            }
        }
        OPC_SHLD_cl | OPC_SHRD_cl => FlagEffect::READ_WRITE,
        OPC_CMPSB | OPC_CMPS | OPC_SCASB | OPC_SCAS => {
            if insn.prefixes.intersects(dbt_core::Prefixes::REP | dbt_core::Prefixes::REPNE) {
                // A zero count leaves the flags untouched.
                FlagEffect::READ_WRITE
            } else {
                FlagEffect::WRITE
            }
        }
        0x70..=0x7F => FlagEffect::READ,
        k if (OPC_JCC_long..OPC_JCC_long + 16).contains(&k) => FlagEffect::READ,
        k if (OPC_CMOVCC..OPC_CMOVCC + 16).contains(&k) => FlagEffect::READ,
        k if (OPC_SETCC..OPC_SETCC + 16).contains(&k) => FlagEffect::READ,
        OPC_LOOPNE | OPC_LOOPE => FlagEffect::READ,
        _ => FlagEffect::NONE,
    }
}

/// Whether the flags are live when the block is left after `last`.
///
/// The SysV ABI does not preserve flags across calls and returns; any
/// other exit may reach code that reads them.
pub fn live_at_exit(last: Option<&Insn>) -> bool {
    match last {
        Some(insn) => {
            let key = opc(insn);
            let ext = insn.ext().unwrap_or(0);
            !(matches!(key, OPC_CALL_Jz | OPC_RET | OPC_RET_Iw)
                || (key == OPC_GRP5 && ext == EXT5_CALLN_Ev))
        }
        None => true,
    }
}

/// Backward liveness over `insns`.
///
/// `live_out[i]` is true when the flags present after instruction `i`
/// may be read by a later instruction of the block or after its exit.
/// An INC or DEC whose flags are live reads the carry it keeps.
pub fn flags_liveness(insns: &[Insn], live_at_end: bool) -> Vec<bool> {
    let mut live_out = vec![false; insns.len()];
    let mut live = live_at_end;

    for (i, insn) in insns.iter().enumerate().rev() {
        live_out[i] = live;
        let effect = flag_effect(insn);
        let reads = effect.reads || (effect.keeps_carry && live);
        if effect.writes {
            live = false;
        }
        if reads {
            live = true;
        }
    }
    live_out
}

/// Whether the block reads flags that were live on entry, given the
/// per-instruction liveness from [`flags_liveness`].
pub fn flags_live_in(insns: &[Insn], live_out: &[bool]) -> bool {
    for (insn, &live) in insns.iter().zip(live_out) {
        let effect = flag_effect(insn);
        if effect.reads || (effect.keeps_carry && live) {
            return true;
        }
        if effect.writes {
            return false;
        }
    }
    false
}
