pub mod cond;
pub mod emitter;
pub mod insn;
pub mod regs;

pub use cond::{HostCond, Nzcv};
pub use regs::HostReg;
