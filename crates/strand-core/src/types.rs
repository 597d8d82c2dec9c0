//! Record types shared between the log, the store and the engine.

use crate::error::{EngineError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Log position - strictly monotonic, assigned by the log.
///
/// Positions are opaque comparable values; the only way to derive the
/// "next" position is [`seek_to_next_event`](crate::traits::LogReader::seek_to_next_event)
/// on a reader.
pub type LogPosition = i64;

/// Sentinel for "no position".
pub const UNSET_POSITION: LogPosition = -1;

/// Identifier of one partition (one log, one store, one engine).
pub type PartitionId = u32;

/// Kind of a record on the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// Externally injected record; processing it may produce follow-ups.
    /// A command is its own source event (`source_position == position`).
    Command,
    /// Follow-up record emitted by a processor.
    Event,
    /// Deterministic business-rule refusal, emitted as a follow-up.
    Rejection,
}

/// Opaque key identifying the kind of payload a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueType(pub u16);

/// Opaque key identifying the operation a record asks for or reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Intent(pub u16);

/// Decoded record header; processor dispatch is keyed by
/// `(value_type, intent)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub record_type: RecordType,
    pub value_type: ValueType,
    pub intent: Intent,
}

/// One record as stored on the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Position assigned by the log.
    pub position: LogPosition,
    /// Position of the record whose processing caused this record to be
    /// written. Equals `position` for commands.
    pub source_position: LogPosition,
    /// Application-level entity key.
    pub key: i64,
    pub header: RecordHeader,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Record {
    pub fn is_command(&self) -> bool {
        self.header.record_type == RecordType::Command
    }
}

/// A record staged for appending; the log assigns the position.
///
/// Appending with `source_position == UNSET_POSITION` marks an externally
/// injected command; the log stamps the assigned position as the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    pub source_position: LogPosition,
    pub key: i64,
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

impl PendingRecord {
    /// An externally injected command.
    pub fn command(key: i64, value_type: ValueType, intent: Intent, payload: Vec<u8>) -> Self {
        Self {
            source_position: UNSET_POSITION,
            key,
            header: RecordHeader {
                record_type: RecordType::Command,
                value_type,
                intent,
            },
            payload,
        }
    }
}

/// View of one record handed to a processor; the payload bytes live in
/// the engine's per-value-type cache and must not be held across a
/// suspension (the borrow enforces this).
#[derive(Debug)]
pub struct TypedRecord<'a> {
    pub position: LogPosition,
    pub source_position: LogPosition,
    pub key: i64,
    pub header: RecordHeader,
    value: &'a [u8],
}

impl<'a> TypedRecord<'a> {
    pub fn new(record: &Record, value: &'a [u8]) -> Self {
        Self {
            position: record.position,
            source_position: record.source_position,
            key: record.key,
            header: record.header,
            value,
        }
    }

    /// Raw payload bytes.
    pub fn value_bytes(&self) -> &[u8] {
        self.value
    }

    /// Decode the payload as JSON.
    pub fn decode_value<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(self.value).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}
