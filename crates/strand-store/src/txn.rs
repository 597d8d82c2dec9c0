use crate::store::StoreInner;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use strand_core::{LogPosition, Result, StateTxn};

/// Write transaction over a [`MemoryStateStore`](crate::MemoryStateStore).
///
/// Puts and deletes are buffered; reads see the buffer first, then the
/// committed state. Commit applies the buffer and the new last-processed
/// position under one write lock.
pub struct MemoryTxn {
    store: Arc<RwLock<StoreInner>>,
    // None marks a delete
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl MemoryTxn {
    pub(crate) fn new(store: Arc<RwLock<StoreInner>>) -> Self {
        Self {
            store,
            pending: BTreeMap::new(),
        }
    }
}

impl StateTxn for MemoryTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.store.read().entries.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn commit(mut self: Box<Self>, position: LogPosition) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut inner = self.store.write();
        for (key, value) in pending {
            match value {
                Some(value) => {
                    inner.entries.insert(key, value);
                }
                None => {
                    inner.entries.remove(&key);
                }
            }
        }
        inner.last_processed = position;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}
