//! In-process partition log
//!
//! An in-memory implementation of the `strand-core` log traits:
//! - Dense positions assigned by the log, starting at 1
//! - All-or-nothing batch appends under one lock
//! - Committed-position tracking with commit notifications
//! - Readers bounded by the committed position, with
//!   `seek_to_next_event` recovery semantics
//!
//! Durable log backends plug in through the same traits; this crate is
//! the reference implementation the engine and its tests run against.

mod reader;
mod stream;
mod writer;

pub use reader::PartitionLogReader;
pub use stream::{PartitionLog, PartitionLogConfig};
pub use writer::PartitionBatchWriter;
