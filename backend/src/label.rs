use crate::aarch64::emitter::{encode_b, encode_b_cond, encode_cbz, encode_tbz, BranchRangeError};
use crate::aarch64::HostCond;
use crate::aarch64::HostReg;
use crate::code_buffer::CodeBuffer;

/// A branch target inside the block being emitted.
///
/// Labels support forward references: branches can name a label
/// before it is placed, and binding the label back-patches them.
#[derive(Debug, Clone, Default)]
pub struct Label {
    /// Resolved offset in the code buffer, once bound.
    pub value: Option<usize>,
    /// Forward references waiting for the label to be bound.
    pub uses: Vec<LabelUse>,
}

/// A branch emitted before its target was known.
#[derive(Debug, Clone, Copy)]
pub struct LabelUse {
    /// Offset of the branch word in the code buffer.
    pub offset: usize,
    pub kind: RelocKind,
}

/// Relocation kinds for label back-patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// `B` (imm26).
    Jump,
    /// `B.cond` (imm19).
    CondJump(HostCond),
    /// `CBZ`/`CBNZ` (imm19).
    CompareJump { sf: bool, nonzero: bool, rt: HostReg },
    /// `TBZ`/`TBNZ` (imm14).
    TestJump { nonzero: bool, rt: HostReg, bit: u32 },
}

impl RelocKind {
    fn encode(self, disp: i64) -> Result<u32, BranchRangeError> {
        match self {
            RelocKind::Jump => encode_b(disp),
            RelocKind::CondJump(cond) => encode_b_cond(cond, disp),
            RelocKind::CompareJump { sf, nonzero, rt } => encode_cbz(sf, nonzero, rt, disp),
            RelocKind::TestJump { nonzero, rt, bit } => encode_tbz(nonzero, rt, bit, disp),
        }
    }
}

impl Label {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a branch of `kind` to this label.
    ///
    /// A bound label is encoded immediately; otherwise a placeholder
    /// word is emitted and patched by [`Label::bind`].
    pub fn branch(&mut self, buf: &mut CodeBuffer, kind: RelocKind) -> Result<(), BranchRangeError> {
        let offset = buf.offset();
        match self.value {
            Some(target) => buf.emit_u32(kind.encode(target as i64 - offset as i64)?),
            None => {
                self.uses.push(LabelUse { offset, kind });
                buf.emit_u32(kind.encode(0)?);
            }
        }
        Ok(())
    }

    /// Place the label at the current buffer offset and resolve every
    /// pending use.
    pub fn bind(&mut self, buf: &mut CodeBuffer) -> Result<(), BranchRangeError> {
        let target = buf.offset();
        self.value = Some(target);
        for u in self.uses.drain(..) {
            let word = u.kind.encode(target as i64 - u.offset as i64)?;
            buf.patch_u32(u.offset, word);
        }
        Ok(())
    }

    pub fn has_pending_uses(&self) -> bool {
        !self.uses.is_empty()
    }
}
