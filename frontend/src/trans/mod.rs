//! Per-category translation handlers.
//!
//! A handler emits host code for one decoded instruction and returns
//! `false` when it cannot translate that form. It may have emitted
//! partial code before refusing; the dispatcher rewinds the buffer.

pub mod alu;
pub mod bit;
pub mod branch;
pub mod exit;
pub mod mem;
pub mod misc;
pub mod operand;
pub mod string;

use dbt_backend::CodeBuffer;
use dbt_core::Insn;

use crate::ctx::DisasContext;

/// Translation entry point of one instruction category.
pub type Handler = fn(&mut DisasContext, &mut CodeBuffer, &Insn) -> bool;

pub use alu::trans_arith;
pub use bit::trans_bit;
pub use branch::trans_control_flow;
pub use mem::trans_memory;
pub use misc::trans_misc;
pub use string::trans_string;
