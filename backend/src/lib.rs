//! AArch64 host side of the translator: the per-block code buffer,
//! instruction encoders, the peephole pass, the executable memory that
//! finished blocks are installed into, and chain-site patching.

pub mod aarch64;
pub mod code_buffer;
pub mod exec_mem;
pub mod icache;
pub mod label;
pub mod optimize;
pub mod patch;

pub use aarch64::{HostCond, HostReg, Nzcv};
pub use code_buffer::CodeBuffer;
pub use exec_mem::{CodeRegion, ExecMemError, ExecutableMemory};
pub use icache::{HostIcache, IcacheFlush};
pub use label::{Label, RelocKind};
pub use optimize::optimize;
pub use patch::{patch_jump, reset_jump, PatchError};
