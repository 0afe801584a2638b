//! Direct-mapped translation cache: guest address to host address.
//!
//! Each slot is guarded by a sequence lock. Readers never block; they
//! retry only while a writer is mid-update, so guest, host, hash and
//! size always become visible together. Writers are serialized by one
//! mutex; the resident count is only changed under it but read freely.

use std::hint;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

/// Default table size: 2^12 slots.
pub const DEFAULT_TABLE_BITS: u32 = 12;
/// Largest supported table: 2^24 slots.
pub const MAX_TABLE_BITS: u32 = 24;

/// Hash used for both lookup and insert (Fibonacci hashing).
#[inline]
pub fn hash_guest_addr(addr: u64) -> u64 {
    addr.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("translation cache full ({max_resident} resident entries)")]
    Full { max_resident: usize },
}

/// Lookup counters and occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub resident: usize,
}

/// A consistent copy of one occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub guest: u64,
    pub host: u64,
    pub hash: u64,
    /// Lookup hits since insertion.
    pub hits: u64,
    /// Host block size in bytes.
    pub size: u32,
}

/// A host address of 0 marks an empty slot.
#[derive(Default)]
struct Slot {
    seq: AtomicU64,
    guest: AtomicU64,
    host: AtomicU64,
    hash: AtomicU64,
    size: AtomicU32,
    hits: AtomicU64,
}

impl Slot {
    /// Read guest, host, hash and size as one unit.
    fn read(&self) -> (u64, u64, u64, u32) {
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 != 0 {
                hint::spin_loop();
                continue;
            }
            let guest = self.guest.load(Ordering::Relaxed);
            let host = self.host.load(Ordering::Relaxed);
            let hash = self.hash.load(Ordering::Relaxed);
            let size = self.size.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) == s1 {
                return (guest, host, hash, size);
            }
        }
    }

    /// Caller holds the writer lock.
    fn write(&self, guest: u64, host: u64, hash: u64, size: u32) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.guest.store(guest, Ordering::Relaxed);
        self.host.store(host, Ordering::Relaxed);
        self.hash.store(hash, Ordering::Relaxed);
        self.size.store(size, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn clear(&self) {
        self.write(0, 0, 0, 0);
    }
}

/// Fixed-size guest→host map shared by every translating thread.
pub struct TranslationCache {
    slots: Box<[Slot]>,
    mask: u64,
    max_resident: usize,
    writer: Mutex<()>,
    resident: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    /// A table of `2^table_bits` slots holding at most `max_resident`
    /// entries. `table_bits` is clamped to `1..=MAX_TABLE_BITS`.
    pub fn new(table_bits: u32, max_resident: usize) -> Self {
        let bits = table_bits.clamp(1, MAX_TABLE_BITS);
        let len = 1usize << bits;
        let slots = (0..len).map(|_| Slot::default()).collect();
        Self {
            slots,
            mask: len as u64 - 1,
            max_resident: max_resident.min(len),
            writer: Mutex::new(()),
            resident: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[inline]
    fn slot(&self, hash: u64) -> &Slot {
        &self.slots[(hash & self.mask) as usize]
    }

    pub fn table_size(&self) -> usize {
        self.slots.len()
    }

    pub fn max_resident(&self) -> usize {
        self.max_resident
    }

    /// Host address of the translation of `guest`.
    pub fn lookup(&self, guest: u64) -> Option<u64> {
        let slot = self.slot(hash_guest_addr(guest));
        let (g, host, _, _) = slot.read();
        if host != 0 && g == guest {
            slot.hits.fetch_add(1, Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(host)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Map `guest` to `host`, replacing whatever shared its slot.
    ///
    /// Returns the guest address of an evicted entry with a different
    /// guest address. Fails only when the slot is empty and the resident
    /// bound is reached.
    pub fn insert(&self, guest: u64, host: u64, size: u32) -> Result<Option<u64>, CacheError> {
        let hash = hash_guest_addr(guest);
        let slot = self.slot(hash);
        let _writer = self.writer.lock();
        let (old_guest, old_host, _, _) = slot.read();
        let occupied = old_host != 0;
        if !occupied && self.resident.load(Ordering::Relaxed) >= self.max_resident {
            return Err(CacheError::Full {
                max_resident: self.max_resident,
            });
        }
        slot.write(guest, host, hash, size);
        if !occupied {
            self.resident.fetch_add(1, Ordering::Relaxed);
        }
        Ok((occupied && old_guest != guest).then_some(old_guest))
    }

    /// Drop the entry for `guest`. Returns false when there was none.
    pub fn invalidate(&self, guest: u64) -> bool {
        let slot = self.slot(hash_guest_addr(guest));
        let _writer = self.writer.lock();
        let (g, host, _, _) = slot.read();
        if host == 0 || g != guest {
            return false;
        }
        slot.clear();
        self.resident.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Empty every slot. Counters are kept.
    pub fn flush(&self) {
        let _writer = self.writer.lock();
        for slot in self.slots.iter() {
            if slot.read().1 != 0 {
                slot.clear();
            }
        }
        self.resident.store(0, Ordering::Relaxed);
    }

    pub fn resident(&self) -> usize {
        self.resident.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            resident: self.resident(),
        }
    }

    /// Occupied entries in slot order.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let (guest, host, hash, size) = slot.read();
                (host != 0).then(|| CacheEntry {
                    guest,
                    host,
                    hash,
                    hits: slot.hits.load(Ordering::Relaxed),
                    size,
                })
            })
            .collect()
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_BITS, 1 << DEFAULT_TABLE_BITS)
    }
}

impl std::fmt::Debug for TranslationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationCache")
            .field("table_size", &self.table_size())
            .field("max_resident", &self.max_resident)
            .field("stats", &self.stats())
            .finish()
    }
}
