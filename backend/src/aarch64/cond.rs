/// A64 condition codes (`cond` field of B.cond, CSEL, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostCond {
    Eq = 0x0,
    Ne = 0x1,
    /// Unsigned higher or same (carry set).
    Hs = 0x2,
    /// Unsigned lower (carry clear).
    Lo = 0x3,
    Mi = 0x4,
    Pl = 0x5,
    Vs = 0x6,
    Vc = 0x7,
    Hi = 0x8,
    Ls = 0x9,
    Ge = 0xA,
    Lt = 0xB,
    Gt = 0xC,
    Le = 0xD,
    Al = 0xE,
    Nv = 0xF,
}

impl HostCond {
    pub const ALL: [HostCond; 16] = [
        HostCond::Eq,
        HostCond::Ne,
        HostCond::Hs,
        HostCond::Lo,
        HostCond::Mi,
        HostCond::Pl,
        HostCond::Vs,
        HostCond::Vc,
        HostCond::Hi,
        HostCond::Ls,
        HostCond::Ge,
        HostCond::Lt,
        HostCond::Gt,
        HostCond::Le,
        HostCond::Al,
        HostCond::Nv,
    ];

    #[inline]
    pub const fn from_bits(bits: u32) -> HostCond {
        Self::ALL[(bits & 0xF) as usize]
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self as u32
    }

    /// Logical negation. `Al`/`Nv` have no inverse and map onto each other.
    #[inline]
    pub const fn invert(self) -> HostCond {
        Self::from_bits(self as u32 ^ 1)
    }

    pub const fn mnemonic(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "eq", "ne", "hs", "lo", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt",
            "gt", "le", "al", "nv",
        ];
        NAMES[self as usize]
    }
}

/// Host condition flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Nzcv {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

impl Nzcv {
    /// Pack into the layout of the NZCV system register (bits 31..28).
    pub const fn to_bits(self) -> u32 {
        (self.n as u32) << 31 | (self.z as u32) << 30 | (self.c as u32) << 29 | (self.v as u32) << 28
    }

    /// Evaluate `cond` per the A64 `ConditionHolds` pseudocode.
    pub const fn eval(self, cond: HostCond) -> bool {
        let base = match (cond as u8) >> 1 {
            0 => self.z,
            1 => self.c,
            2 => self.n,
            3 => self.v,
            4 => self.c && !self.z,
            5 => self.n == self.v,
            6 => self.n == self.v && !self.z,
            _ => true,
        };
        if (cond as u8) & 1 != 0 && (cond as u8) != 0xF {
            !base
        } else {
            base
        }
    }
}
