//! Record value cache.
//!
//! The hot path decodes one record per iteration; pooling one buffer per
//! value type keeps that free of per-record allocation once the pool is
//! warm.

use std::collections::HashMap;
use strand_core::ValueType;

/// Per-value-type pool of reusable payload buffers.
///
/// The buffer returned by [`load`](RecordValues::load) is only valid
/// until the next call; callers must not hold it across a suspension
/// (the borrow enforces this).
pub struct RecordValues {
    pools: HashMap<ValueType, Vec<u8>>,
}

impl RecordValues {
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    /// Copy `payload` into the pooled buffer for `value_type` and return
    /// it.
    pub fn load(&mut self, value_type: ValueType, payload: &[u8]) -> &[u8] {
        let buf = self.pools.entry(value_type).or_default();
        buf.clear();
        buf.extend_from_slice(payload);
        buf
    }

    /// Number of value types with a pooled buffer.
    pub fn pooled_types(&self) -> usize {
        self.pools.len()
    }
}

impl Default for RecordValues {
    fn default() -> Self {
        Self::new()
    }
}
