/// Default per-block code buffer size: 64 KiB.
pub const DEFAULT_BLOCK_BUF_SIZE: usize = 64 * 1024;

/// Append-only, bounds-checked byte sink for one block's host code.
///
/// The write cursor is the size of the code generated so far. A write
/// that does not fit sets the overflow flag and is discarded whole, so
/// the bytes already written are never corrupted. Callers must check
/// [`CodeBuffer::overflowed`] before trusting the emitted size.
#[derive(Debug, Clone)]
pub struct CodeBuffer {
    data: Vec<u8>,
    capacity: usize,
    overflow: bool,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            overflow: false,
        }
    }

    /// Allocate with the default size (64 KiB).
    pub fn with_default_size() -> Self {
        Self::new(DEFAULT_BLOCK_BUF_SIZE)
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remaining writable bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Whether any write was dropped for lack of space.
    #[inline]
    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    /// Rewind the cursor to an earlier offset, dropping what follows.
    /// Offsets past the cursor are ignored.
    pub fn set_offset(&mut self, offset: usize) {
        if offset <= self.data.len() {
            self.data.truncate(offset);
        }
    }

    /// Empty the buffer and clear the overflow flag for the next block.
    pub fn reset(&mut self) {
        self.data.clear();
        self.overflow = false;
    }

    // -- Emit methods --

    /// Append raw bytes. All other emitters go through here.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.len() > self.remaining() {
            self.overflow = true;
            return;
        }
        self.data.extend_from_slice(bytes);
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.append(&[val]);
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.append(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.append(&val.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.append(&val.to_le_bytes());
    }

    /// Patch a u32 at the given offset (for back-patching branches).
    /// Offsets outside the written range are ignored.
    pub fn patch_u32(&mut self, offset: usize, val: u32) {
        if let Some(slot) = self.data.get_mut(offset..offset + 4) {
            slot.copy_from_slice(&val.to_le_bytes());
        }
    }

    /// Read a u32 at the given offset.
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.data.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// The generated code (up to the current offset).
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
