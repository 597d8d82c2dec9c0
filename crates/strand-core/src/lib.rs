//! Strand Core: Traits and types for the strand stream processing engine
//!
//! This crate defines the core abstractions for a per-partition,
//! single-writer stream processing engine:
//! - Log stream: append-only, totally-ordered record log with a committed
//!   position and commit notifications
//! - State store: transactional KV whose commits carry the last-processed
//!   log position
//! - Record processors: business logic keyed by `(value type, intent)`,
//!   with lifecycle hooks
//!
//! Key properties:
//! - Exactly-once state updates: position and state commit atomically
//! - Deterministic replay: the engine can rebuild state from the log
//!   without re-emitting follow-up records
//! - Single-writer discipline: one processing task owns all mutable state

pub mod config;
pub mod error;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, RetryConfig};
pub use error::{EngineError, Result};
pub use traits::{
    FollowUpWriter, LogBatchWriter, LogReader, LogStream, RecordProcessor, RecordProcessorMap,
    StateStore, StateTxn, StateTxnExt,
};
pub use types::{
    Intent, LogPosition, PartitionId, PendingRecord, Record, RecordHeader, RecordType, TypedRecord,
    ValueType, UNSET_POSITION,
};
