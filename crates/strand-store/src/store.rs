use crate::txn::MemoryTxn;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use strand_core::{LogPosition, Result, StateStore, StateTxn, UNSET_POSITION};

pub(crate) struct StoreInner {
    pub(crate) entries: BTreeMap<Vec<u8>, Vec<u8>>,
    pub(crate) last_processed: LogPosition,
}

/// In-memory state store for one partition.
///
/// Cloning is cheap and shares the underlying state.
#[derive(Clone)]
pub struct MemoryStateStore {
    pub(crate) inner: Arc<RwLock<StoreInner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                entries: BTreeMap::new(),
                last_processed: UNSET_POSITION,
            })),
        }
    }

    /// Read one entry outside any transaction.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Snapshot of all entries. Test accessor.
    pub fn entries(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.inner.read().entries.clone()
    }

    /// Overwrite the persisted last-processed position. Test seeding for
    /// recovery scenarios; the engine itself only moves the position
    /// through transaction commits.
    pub fn set_last_processed_position(&self, position: LogPosition) {
        self.inner.write().last_processed = position;
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn begin(&self) -> Result<Box<dyn StateTxn + '_>> {
        Ok(Box::new(MemoryTxn::new(self.inner.clone())))
    }

    fn last_processed_position(&self) -> Result<LogPosition> {
        Ok(self.inner.read().last_processed)
    }
}
