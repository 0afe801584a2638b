//! Guest condition codes in terms of host NZCV.
//!
//! The host flags only mirror the x86 flags up to the family of the
//! instruction that produced them: A64 subtraction sets C on "no borrow"
//! while x86 sets CF on borrow, logical ops clear C, and some producers
//! only leave Z and N meaningful. [`FlagsOrigin`] records that family and
//! [`host_cond`] picks the host condition (if any) that evaluates the
//! same as the guest condition.

use dbt_backend::HostCond;
use dbt_core::GuestCond;

/// Producer family of the live host NZCV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagsOrigin {
    /// `SUBS`/`CMP`/`NEG`/`SBCS`: C is the inverse of CF.
    Sub,
    /// `ADDS`/`ADCS`: C equals CF.
    Add,
    /// `ANDS`/`TST`: C and V are zero, as are CF and OF.
    Logic,
    /// INC/DEC via `ADDS`/`SUBS #1`: the guest CF was left untouched
    /// but the host C was not.
    IncDec,
    /// Only Z and N follow the result.
    ResultOnly,
    /// `TST` of a single bit: Z is the inverse of CF.
    BitTest,
    /// No usable relation.
    Unknown,
}

impl FlagsOrigin {
    pub const ALL: [FlagsOrigin; 7] = [
        FlagsOrigin::Sub,
        FlagsOrigin::Add,
        FlagsOrigin::Logic,
        FlagsOrigin::IncDec,
        FlagsOrigin::ResultOnly,
        FlagsOrigin::BitTest,
        FlagsOrigin::Unknown,
    ];
}

/// Host rendition of a guest condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondMapping {
    Host(HostCond),
    /// The guest condition is always true for this origin.
    Always,
    /// The guest condition is always false for this origin.
    Never,
    Unsupported,
}

/// Mapping valid whenever V, N and Z are exact.
const fn signed_cond(cc: GuestCond) -> CondMapping {
    use GuestCond as G;
    CondMapping::Host(match cc {
        G::O => HostCond::Vs,
        G::No => HostCond::Vc,
        G::E => HostCond::Eq,
        G::Ne => HostCond::Ne,
        G::S => HostCond::Mi,
        G::Ns => HostCond::Pl,
        G::L => HostCond::Lt,
        G::Ge => HostCond::Ge,
        G::Le => HostCond::Le,
        G::G => HostCond::Gt,
        _ => return CondMapping::Unsupported,
    })
}

/// Host condition equivalent to guest condition `cc` when the live
/// flags were produced by an instruction of family `origin`.
///
/// Parity conditions are never supported: PF is not modelled.
pub const fn host_cond(cc: GuestCond, origin: FlagsOrigin) -> CondMapping {
    use GuestCond as G;
    match origin {
        FlagsOrigin::Sub => match cc {
            G::B => CondMapping::Host(HostCond::Lo),
            G::Ae => CondMapping::Host(HostCond::Hs),
            G::Be => CondMapping::Host(HostCond::Ls),
            G::A => CondMapping::Host(HostCond::Hi),
            _ => signed_cond(cc),
        },
        FlagsOrigin::Add => match cc {
            G::B => CondMapping::Host(HostCond::Hs),
            G::Ae => CondMapping::Host(HostCond::Lo),
            G::Be | G::A => CondMapping::Unsupported,
            _ => signed_cond(cc),
        },
        FlagsOrigin::Logic => match cc {
            G::B => CondMapping::Never,
            G::Ae => CondMapping::Always,
            G::Be => CondMapping::Host(HostCond::Eq),
            G::A => CondMapping::Host(HostCond::Ne),
            _ => signed_cond(cc),
        },
        FlagsOrigin::IncDec => match cc {
            G::B | G::Ae | G::Be | G::A => CondMapping::Unsupported,
            _ => signed_cond(cc),
        },
        FlagsOrigin::ResultOnly => match cc {
            G::E | G::Ne | G::S | G::Ns => signed_cond(cc),
            _ => CondMapping::Unsupported,
        },
        FlagsOrigin::BitTest => match cc {
            G::B => CondMapping::Host(HostCond::Ne),
            G::Ae => CondMapping::Host(HostCond::Eq),
            _ => CondMapping::Unsupported,
        },
        FlagsOrigin::Unknown => CondMapping::Unsupported,
    }
}
