//! x86 condition codes and their reference semantics.

/// The 16 x86 condition codes, in encoding order (`Jcc` low nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GuestCond {
    O = 0x0,
    No = 0x1,
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    S = 0x8,
    Ns = 0x9,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl GuestCond {
    pub const ALL: [GuestCond; 16] = [
        GuestCond::O,
        GuestCond::No,
        GuestCond::B,
        GuestCond::Ae,
        GuestCond::E,
        GuestCond::Ne,
        GuestCond::Be,
        GuestCond::A,
        GuestCond::S,
        GuestCond::Ns,
        GuestCond::P,
        GuestCond::Np,
        GuestCond::L,
        GuestCond::Ge,
        GuestCond::Le,
        GuestCond::G,
    ];

    /// Condition for an encoding nibble; higher bits are ignored.
    #[inline]
    pub const fn from_nibble(cc: u8) -> GuestCond {
        Self::ALL[(cc & 0xF) as usize]
    }

    /// Logical negation: flips the low encoding bit.
    #[inline]
    pub const fn invert(self) -> GuestCond {
        Self::from_nibble(self as u8 ^ 1)
    }

    pub const fn mnemonic(self) -> &'static str {
        const NAMES: [&str; 16] = [
            "o", "no", "b", "ae", "e", "ne", "be", "a", "s", "ns", "p", "np", "l",
            "ge", "le", "g",
        ];
        NAMES[self as usize]
    }
}

/// The arithmetic flags of RFLAGS that conditions read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct X86Flags {
    pub cf: bool,
    pub pf: bool,
    pub zf: bool,
    pub sf: bool,
    pub of: bool,
}

impl X86Flags {
    /// Evaluate `cond` the way the guest CPU does.
    pub const fn eval(self, cond: GuestCond) -> bool {
        let base = match (cond as u8) >> 1 {
            0 => self.of,
            1 => self.cf,
            2 => self.zf,
            3 => self.cf || self.zf,
            4 => self.sf,
            5 => self.pf,
            6 => self.sf != self.of,
            _ => self.zf || (self.sf != self.of),
        };
        base ^ ((cond as u8) & 1 != 0)
    }
}
