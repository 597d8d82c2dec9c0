//! Record processor registry
//!
//! Processors implement the business logic applied to each record. The
//! engine dispatches on `(value type, intent)`; a missing entry means the
//! record is skipped as processed.
//!
//! # Example
//!
//! ```
//! use strand_core::{
//!     FollowUpWriter, Intent, RecordProcessor, RecordProcessorMap, Result, StateTxn,
//!     TypedRecord, ValueType,
//! };
//!
//! struct DepositProcessor;
//!
//! impl RecordProcessor for DepositProcessor {
//!     fn process(
//!         &mut self,
//!         record: &TypedRecord<'_>,
//!         _writer: &mut dyn FollowUpWriter,
//!         txn: &mut dyn StateTxn,
//!     ) -> Result<()> {
//!         txn.put(b"balance", record.value_bytes())
//!     }
//! }
//!
//! let mut processors = RecordProcessorMap::new();
//! processors
//!     .try_register(ValueType(1), Intent(1), Box::new(DepositProcessor))
//!     .unwrap();
//! ```

use crate::error::{EngineError, Result};
use crate::traits::store::StateTxn;
use crate::types::{Intent, TypedRecord, ValueType};
use std::collections::HashMap;

/// Sink for follow-up records staged while processing one record.
///
/// The engine stamps the source position (the record being processed)
/// and flushes the whole batch atomically before committing the store
/// transaction. During replay the writer is a no-op: handlers run the
/// same code, but nothing is emitted.
pub trait FollowUpWriter {
    /// Stage a follow-up event.
    fn append_follow_up(
        &mut self,
        key: i64,
        value_type: ValueType,
        intent: Intent,
        payload: &[u8],
    ) -> Result<()>;

    /// Stage a rejection, the deterministic refusal of a command.
    fn append_rejection(
        &mut self,
        key: i64,
        value_type: ValueType,
        intent: Intent,
        payload: &[u8],
    ) -> Result<()>;
}

/// Business logic for one `(value type, intent)` pair, plus lifecycle
/// hooks invoked by the engine on the processing task.
pub trait RecordProcessor: Send {
    /// Apply one record: stage follow-ups into `writer` and mutate state
    /// through `txn`. Both take effect atomically with the record's
    /// position, or not at all.
    fn process(
        &mut self,
        record: &TypedRecord<'_>,
        writer: &mut dyn FollowUpWriter,
        txn: &mut dyn StateTxn,
    ) -> Result<()>;

    /// Called once when the engine starts, before recovery.
    fn on_open(&mut self) {}

    /// Called after recovery completes, before steady-state processing.
    fn on_recovered(&mut self) {}

    fn on_paused(&mut self) {}

    fn on_resumed(&mut self) {}

    /// Called on orderly shutdown. Not called after a failure.
    fn on_close(&mut self) {}

    fn on_failed(&mut self) {}
}

/// Registry of record processors keyed by `(value type, intent)`.
pub struct RecordProcessorMap {
    processors: HashMap<(ValueType, Intent), Box<dyn RecordProcessor>>,
}

impl RecordProcessorMap {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Register a processor, returning an error if the key is taken.
    pub fn try_register(
        &mut self,
        value_type: ValueType,
        intent: Intent,
        processor: Box<dyn RecordProcessor>,
    ) -> Result<()> {
        if self.processors.contains_key(&(value_type, intent)) {
            return Err(EngineError::InvalidState(format!(
                "processor for ({:?}, {:?}) already registered",
                value_type, intent
            )));
        }
        self.processors.insert((value_type, intent), processor);
        Ok(())
    }

    pub fn get_mut<'a>(
        &'a mut self,
        value_type: ValueType,
        intent: Intent,
    ) -> Option<&'a mut (dyn RecordProcessor + 'a)> {
        self.processors
            .get_mut(&(value_type, intent))
            .map(|p| -> &'a mut (dyn RecordProcessor + 'a) { &mut **p })
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn notify_open(&mut self) {
        self.for_each(|p| p.on_open());
    }

    pub fn notify_recovered(&mut self) {
        self.for_each(|p| p.on_recovered());
    }

    pub fn notify_paused(&mut self) {
        self.for_each(|p| p.on_paused());
    }

    pub fn notify_resumed(&mut self) {
        self.for_each(|p| p.on_resumed());
    }

    pub fn notify_close(&mut self) {
        self.for_each(|p| p.on_close());
    }

    pub fn notify_failed(&mut self) {
        self.for_each(|p| p.on_failed());
    }

    fn for_each(&mut self, mut f: impl FnMut(&mut dyn RecordProcessor)) {
        for processor in self.processors.values_mut() {
            f(processor.as_mut());
        }
    }
}

impl Default for RecordProcessorMap {
    fn default() -> Self {
        Self::new()
    }
}
