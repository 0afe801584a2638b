//! Fixed guest-to-host register assignment.
//!
//! Guest `RAX..R15` live permanently in host `X0..X15`; the host
//! registers with a fixed role are listed in
//! [`dbt_backend::aarch64::regs`].

use dbt_backend::aarch64::regs::RESERVED_REGS;
use dbt_backend::HostReg;
use dbt_core::{Reg, NUM_GUEST_GPRS};

/// Host register holding guest register `r`.
#[inline]
pub const fn host_reg(r: Reg) -> HostReg {
    HostReg::from_index(r.index() as u32)
}

/// Guest register held in host register `h`, if any.
pub fn guest_reg(h: HostReg) -> Option<Reg> {
    let idx = h.enc() as usize;
    (idx < NUM_GUEST_GPRS).then(|| Reg::from_index(idx as u8))
}

/// Whether `h` may never carry guest state.
pub fn is_reserved(h: HostReg) -> bool {
    RESERVED_REGS.contains(&h)
}
