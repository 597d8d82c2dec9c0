use crate::types::{LogPosition, PartitionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("log error: {0}")]
    Log(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(
        "expected to find a record at or after position {position} in the log of partition \
         {partition}, but nothing was found; cannot recover"
    )]
    SnapshotNotFound {
        partition: PartitionId,
        position: LogPosition,
    },

    #[error("recovery of partition {partition} failed: {reason}")]
    Recovery {
        partition: PartitionId,
        reason: String,
    },

    #[error("processing of record at position {position} failed: {reason}")]
    Processing {
        position: LogPosition,
        retryable: bool,
        reason: String,
    },

    #[error("record fragment too large ({size} bytes, max {max})")]
    FragmentTooLarge { size: usize, max: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("engine is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// A transient processing error; the engine retries the iteration
    /// with bounded backoff.
    pub fn retryable(position: LogPosition, reason: impl Into<String>) -> Self {
        EngineError::Processing {
            position,
            retryable: true,
            reason: reason.into(),
        }
    }

    /// A deterministic processing error; fatal to the engine instance.
    pub fn fatal(position: LogPosition, reason: impl Into<String>) -> Self {
        EngineError::Processing {
            position,
            retryable: false,
            reason: reason.into(),
        }
    }

    /// Whether the error is covered by the transient-retry contract.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Processing {
                retryable: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flag_is_carried() {
        assert!(EngineError::retryable(3, "io hiccup").is_retryable());
        assert!(!EngineError::fatal(3, "bad record").is_retryable());
        assert!(!EngineError::Closed.is_retryable());
    }

    #[test]
    fn snapshot_not_found_names_position_and_partition() {
        let err = EngineError::SnapshotNotFound {
            partition: 7,
            position: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("7"));
    }
}
