//! Processing context: the value bundle shared by both state machines.

use crate::values::RecordValues;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strand_core::{
    LogBatchWriter, LogReader, LogStream, PartitionId, RecordProcessorMap, StateStore,
};

/// Collaborators wired by the supervisor during start-up, then borrowed
/// mutably by the replay and processing state machines. All access
/// happens on the single processing task; after recovery only the
/// per-iteration transaction scope mutates.
pub(crate) struct ProcessingContext {
    pub(crate) partition_id: PartitionId,
    pub(crate) log_stream: Arc<dyn LogStream>,
    pub(crate) reader: Box<dyn LogReader>,
    pub(crate) writer: Box<dyn LogBatchWriter>,
    pub(crate) max_fragment_size: usize,
    pub(crate) processors: RecordProcessorMap,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) values: RecordValues,
    /// Cleared when the engine is closed; both state machines
    /// short-circuit on it.
    pub(crate) opened: Arc<AtomicBool>,
}

impl ProcessingContext {
    pub(crate) fn should_abort(&self) -> bool {
        !self.opened.load(Ordering::SeqCst)
    }
}
