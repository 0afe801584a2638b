//! x86-64 guest: instruction decoder and opcode tables.

pub mod decode;
pub mod opcodes;

pub use decode::{decode, DecodeError};
pub use opcodes::opc;
