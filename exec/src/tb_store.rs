use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dbt_core::{ChainSlot, TranslatedBlock};
use parking_lot::{Mutex, RwLock};

/// A direct exit waiting for its target block to be translated.
type Pending = (Weak<TranslatedBlock>, ChainSlot);

/// Resident translated blocks, keyed by guest pc.
///
/// Owns the `Arc` that keeps a block's metadata alive; chain links
/// between blocks are `Weak`. Also records direct exits whose target
/// is not resident yet, so the target can link its predecessors when
/// it is installed.
#[derive(Debug, Default)]
pub struct TbStore {
    blocks: RwLock<HashMap<u64, Arc<TranslatedBlock>>>,
    pending: Mutex<HashMap<u64, Vec<Pending>>>,
}

impl TbStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resident block at `pc`.
    pub fn get(&self, pc: u64) -> Option<Arc<TranslatedBlock>> {
        self.blocks.read().get(&pc).cloned()
    }

    /// Publish `tb`, returning the block it replaces.
    pub fn insert(&self, tb: Arc<TranslatedBlock>) -> Option<Arc<TranslatedBlock>> {
        self.blocks.write().insert(tb.pc, tb)
    }

    pub fn remove(&self, pc: u64) -> Option<Arc<TranslatedBlock>> {
        self.blocks.write().remove(&pc)
    }

    /// Resident blocks whose guest range overlaps `start..start+len`.
    pub fn overlapping(&self, start: u64, len: u64) -> Vec<Arc<TranslatedBlock>> {
        self.blocks
            .read()
            .values()
            .filter(|tb| tb.overlaps(start, len))
            .cloned()
            .collect()
    }

    /// Remember that `slot` of `from` wants to jump to `target`.
    pub fn add_pending(&self, target: u64, from: &Arc<TranslatedBlock>, slot: ChainSlot) {
        let mut pending = self.pending.lock();
        let list = pending.entry(target).or_default();
        // Drop entries whose block is gone.
        list.retain(|(w, _)| w.strong_count() > 0);
        list.push((Arc::downgrade(from), slot));
    }

    /// Take every live predecessor waiting on `target`.
    pub fn take_pending(&self, target: u64) -> Vec<(Arc<TranslatedBlock>, ChainSlot)> {
        let list = self.pending.lock().remove(&target).unwrap_or_default();
        list.into_iter()
            .filter_map(|(w, slot)| w.upgrade().map(|tb| (tb, slot)))
            .filter(|(tb, _)| !tb.is_invalid())
            .collect()
    }

    /// Remove every block, marking each invalid, and forget pending
    /// exits. Returns the removed blocks.
    pub fn clear(&self) -> Vec<Arc<TranslatedBlock>> {
        self.pending.lock().clear();
        let drained: Vec<_> = self.blocks.write().drain().map(|(_, tb)| tb).collect();
        for tb in &drained {
            tb.invalid.store(true, std::sync::atomic::Ordering::Release);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
