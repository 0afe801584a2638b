//! Host code disassembler.
//!
//! Turns emitted AArch64 words back into text for trace logs and test
//! failure messages. [`aarch64::print_insn_aarch64`] decodes one word at
//! a given PC and returns the text plus the bytes consumed.

pub mod aarch64;
