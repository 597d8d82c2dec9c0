//! Strand Engine: per-partition stream processor
//!
//! A durable, single-writer engine that consumes an append-only record
//! log, applies registered processors to each record, persists derived
//! state transactionally together with the last-processed position, and
//! appends follow-up records back to the same log.
//!
//! Guarantees:
//! - **Exactly-once state updates**: follow-up records are appended
//!   before the state transaction commits, and the transaction carries
//!   the record's position, so recovery can always tell what happened.
//! - **Deterministic replay**: after a crash the engine re-applies
//!   commands from the snapshot boundary in replay mode, mutating state
//!   without re-emitting follow-ups.
//! - **Single-writer discipline**: one cooperative task per partition
//!   owns all mutable state; external callers enqueue commands and get
//!   futures back.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use strand_core::RecordProcessorMap;
//! use strand_engine::StreamProcessor;
//! use strand_log::{PartitionLog, PartitionLogConfig};
//! use strand_store::MemoryStateStore;
//!
//! # async fn run() -> strand_core::Result<()> {
//! let log = PartitionLog::new(0, PartitionLogConfig::default());
//! let store = MemoryStateStore::new();
//!
//! let processor = StreamProcessor::builder()
//!     .log_stream(Arc::new(log))
//!     .state_store(Arc::new(store))
//!     .processors(RecordProcessorMap::new())
//!     .build()?;
//!
//! processor.open().await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod health;
mod processing;
mod replay;
mod supervisor;
mod values;
mod writers;

pub use health::{FailureListener, HealthMonitorable, HealthStatus, Phase};
pub use supervisor::{StreamProcessor, StreamProcessorBuilder};
pub use values::RecordValues;
