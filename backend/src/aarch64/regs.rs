/// AArch64 general-purpose register numbers.
///
/// `Zr` is encoding 31, which reads as zero and discards writes in the
/// data-processing forms used by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HostReg {
    X0 = 0,
    X1 = 1,
    X2 = 2,
    X3 = 3,
    X4 = 4,
    X5 = 5,
    X6 = 6,
    X7 = 7,
    X8 = 8,
    X9 = 9,
    X10 = 10,
    X11 = 11,
    X12 = 12,
    X13 = 13,
    X14 = 14,
    X15 = 15,
    X16 = 16,
    X17 = 17,
    X18 = 18,
    X19 = 19,
    X20 = 20,
    X21 = 21,
    X22 = 22,
    X23 = 23,
    X24 = 24,
    X25 = 25,
    X26 = 26,
    X27 = 27,
    X28 = 28,
    X29 = 29,
    X30 = 30,
    Zr = 31,
}

impl HostReg {
    const ALL: [HostReg; 32] = [
        HostReg::X0,
        HostReg::X1,
        HostReg::X2,
        HostReg::X3,
        HostReg::X4,
        HostReg::X5,
        HostReg::X6,
        HostReg::X7,
        HostReg::X8,
        HostReg::X9,
        HostReg::X10,
        HostReg::X11,
        HostReg::X12,
        HostReg::X13,
        HostReg::X14,
        HostReg::X15,
        HostReg::X16,
        HostReg::X17,
        HostReg::X18,
        HostReg::X19,
        HostReg::X20,
        HostReg::X21,
        HostReg::X22,
        HostReg::X23,
        HostReg::X24,
        HostReg::X25,
        HostReg::X26,
        HostReg::X27,
        HostReg::X28,
        HostReg::X29,
        HostReg::X30,
        HostReg::Zr,
    ];

    /// Register for a 5-bit encoding; higher bits are ignored.
    #[inline]
    pub const fn from_index(idx: u32) -> HostReg {
        Self::ALL[(idx & 0x1F) as usize]
    }

    /// 5-bit register field.
    #[inline]
    pub const fn enc(self) -> u32 {
        self as u32
    }
}

// -- Register roles --

/// First handler scratch register (IP0). Never holds guest state
/// across instructions.
pub const SCRATCH0: HostReg = HostReg::X16;
/// Second handler scratch register (IP1).
pub const SCRATCH1: HostReg = HostReg::X17;
/// Third scratch register: address folding and immediates of
/// memory-destination operations.
pub const SCRATCH2: HostReg = HostReg::X19;
/// Holds the next guest PC when a block returns to the dispatcher.
pub const EXIT_PC: HostReg = HostReg::X20;
/// Holds a `HelperExit` reason for non-chainable exits. Zero on block
/// entry; only helper exits write it.
pub const EXIT_REASON: HostReg = HostReg::X21;
/// Saved NZCV while an INC or DEC keeps the incoming carry.
pub const FLAGS_TMP: HostReg = HostReg::X22;
/// Return address into the dispatcher; guest code never touches it.
pub const LINK_REG: HostReg = HostReg::X30;

/// Registers guest state may never be mapped onto.
pub const RESERVED_REGS: &[HostReg] = &[
    SCRATCH0,
    SCRATCH1,
    HostReg::X18,
    SCRATCH2,
    EXIT_PC,
    EXIT_REASON,
    FLAGS_TMP,
    HostReg::X29,
    LINK_REG,
    HostReg::Zr,
];
