//! State store traits
//!
//! The engine persists derived state in a transactional KV store. Every
//! commit carries the position of the record whose effects it contains,
//! so state and position are always consistent on disk.

use crate::error::{EngineError, Result};
use crate::types::LogPosition;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Transactional state store for one partition.
pub trait StateStore: Send + Sync {
    /// Begin a write transaction.
    ///
    /// The engine opens at most one transaction at a time; backends are
    /// not required to tolerate concurrent writers.
    fn begin(&self) -> Result<Box<dyn StateTxn + '_>>;

    /// Position of the last record whose effects are durable, or
    /// `UNSET_POSITION` if no record was ever processed. This is the
    /// snapshot boundary recovery starts from.
    fn last_processed_position(&self) -> Result<LogPosition>;
}

/// One open write transaction.
///
/// Note: Not required to be Send, as some backends have thread-affine
/// transactions.
pub trait StateTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Commit the buffered changes together with the new last-processed
    /// position, atomically.
    fn commit(self: Box<Self>, position: LogPosition) -> Result<()>;

    /// Discard the buffered changes.
    fn rollback(self: Box<Self>);
}

/// Serde-typed convenience accessors on any [`StateTxn`].
pub trait StateTxnExt {
    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>>;

    fn put_json<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()>;
}

impl<S: StateTxn + ?Sized> StateTxnExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| EngineError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| EngineError::Serialization(e.to_string()))?;
        self.put(key, &bytes)
    }
}
