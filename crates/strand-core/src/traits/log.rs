//! Log stream traits
//!
//! Defines the interface the engine consumes from the partition log:
//! reader and batch-writer acquisition, committed-position tracking and
//! commit notifications.

use crate::error::Result;
use crate::types::{LogPosition, PartitionId, PendingRecord, Record};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;

/// Append-only, totally-ordered record log for one partition.
///
/// The log is MPSC from the outside (many producers append) but SPSC
/// from the engine's perspective: one reader cursor, one batch writer.
#[async_trait]
pub trait LogStream: Send + Sync {
    fn partition_id(&self) -> PartitionId;

    /// Highest position acknowledged as committed. Readers never return
    /// records beyond it.
    fn committed_position(&self) -> LogPosition;

    /// Acquire a reader positioned at the start of the log.
    async fn new_reader(&self) -> Result<Box<dyn LogReader>>;

    /// Acquire a batch writer.
    async fn new_batch_writer(&self) -> Result<Box<dyn LogBatchWriter>>;

    /// Register a listener notified on every committed-position update.
    fn register_commit_listener(&self, listener: Arc<Notify>);

    /// Remove a previously registered listener.
    fn remove_commit_listener(&self, listener: &Arc<Notify>);
}

/// Cursor over the committed records of a log.
pub trait LogReader: Send {
    /// Position the cursor on the first record strictly after `position`.
    ///
    /// Returns `true` if `position` is `UNSET_POSITION` (cursor at the
    /// start) or the log contains a record at or after `position`;
    /// `false` when the log holds nothing at or past `position`, which
    /// during recovery means the snapshot boundary cannot be located.
    fn seek_to_next_event(&mut self, position: LogPosition) -> Result<bool>;

    /// Whether a committed record is available at the cursor.
    fn has_next(&self) -> bool;

    /// Return the record at the cursor and advance past it.
    fn next(&mut self) -> Result<Option<Record>>;
}

/// Stages records and appends them to the log in one atomic batch.
pub trait LogBatchWriter: Send {
    /// Largest payload the log accepts in one fragment.
    fn max_fragment_size(&self) -> usize;

    /// Stage one record for the next flush.
    fn append(&mut self, record: PendingRecord) -> Result<()>;

    /// Number of records currently staged.
    fn pending(&self) -> usize;

    /// Append all staged records, all-or-nothing.
    ///
    /// Returns the highest assigned position, or `None` when nothing was
    /// staged. On error nothing was appended and the stage is kept.
    fn flush(&mut self) -> Result<Option<LogPosition>>;

    /// Discard all staged records.
    fn reset(&mut self);
}
