use crate::reader::PartitionLogReader;
use crate::writer::PartitionBatchWriter;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use strand_core::{
    EngineError, LogBatchWriter, LogPosition, LogReader, LogStream, PartitionId, PendingRecord,
    Record, Result, UNSET_POSITION,
};
use tokio::sync::Notify;

/// Configuration for the in-process partition log
#[derive(Debug, Clone)]
pub struct PartitionLogConfig {
    /// Maximum size of a single record payload (bytes)
    pub max_fragment_size: usize,
}

impl Default for PartitionLogConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

pub(crate) struct LogInner {
    pub(crate) records: Vec<Record>,
    pub(crate) committed_position: LogPosition,
    next_position: LogPosition,
    listeners: Vec<Arc<Notify>>,
}

pub(crate) struct LogShared {
    pub(crate) partition_id: PartitionId,
    pub(crate) config: PartitionLogConfig,
    pub(crate) inner: RwLock<LogInner>,
}

/// In-memory, totally-ordered record log for one partition.
///
/// Cloning is cheap and shares the underlying log.
#[derive(Clone)]
pub struct PartitionLog {
    shared: Arc<LogShared>,
}

impl PartitionLog {
    pub fn new(partition_id: PartitionId, config: PartitionLogConfig) -> Self {
        Self {
            shared: Arc::new(LogShared {
                partition_id,
                config,
                inner: RwLock::new(LogInner {
                    records: Vec::new(),
                    committed_position: UNSET_POSITION,
                    next_position: 1,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// Append one record; commits immediately.
    ///
    /// A record staged with `source_position == UNSET_POSITION` is an
    /// externally injected command and gets its assigned position
    /// stamped as the source.
    pub fn append(&self, record: PendingRecord) -> Result<LogPosition> {
        self.append_batch(std::slice::from_ref(&record))?
            .ok_or_else(|| EngineError::Log("empty batch".into()))
    }

    /// Append a batch atomically; all records receive consecutive
    /// positions and the committed position advances past the batch.
    ///
    /// Returns the highest assigned position, or `None` for an empty
    /// batch.
    pub fn append_batch(&self, records: &[PendingRecord]) -> Result<Option<LogPosition>> {
        if records.is_empty() {
            return Ok(None);
        }
        for record in records {
            if record.payload.len() > self.shared.config.max_fragment_size {
                return Err(EngineError::FragmentTooLarge {
                    size: record.payload.len(),
                    max: self.shared.config.max_fragment_size,
                });
            }
        }

        let mut inner = self.shared.inner.write();
        let mut last = UNSET_POSITION;
        for record in records {
            let position = inner.next_position;
            inner.next_position += 1;
            let source_position = if record.source_position == UNSET_POSITION {
                position
            } else {
                record.source_position
            };
            inner.records.push(Record {
                position,
                source_position,
                key: record.key,
                header: record.header,
                payload: record.payload.clone(),
            });
            last = position;
        }
        inner.committed_position = last;
        let listeners = inner.listeners.clone();
        drop(inner);

        tracing::trace!(
            partition = self.shared.partition_id,
            count = records.len(),
            last,
            "appended batch"
        );
        for listener in &listeners {
            listener.notify_one();
        }
        Ok(Some(last))
    }

    /// Largest payload accepted in one fragment.
    pub fn max_fragment_size(&self) -> usize {
        self.shared.config.max_fragment_size
    }

    /// Snapshot of all records, committed or not. Test accessor.
    pub fn records(&self) -> Vec<Record> {
        self.shared.inner.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.read().records.is_empty()
    }
}

#[async_trait]
impl LogStream for PartitionLog {
    fn partition_id(&self) -> PartitionId {
        self.shared.partition_id
    }

    fn committed_position(&self) -> LogPosition {
        self.shared.inner.read().committed_position
    }

    async fn new_reader(&self) -> Result<Box<dyn LogReader>> {
        Ok(Box::new(PartitionLogReader::new(self.shared.clone())))
    }

    async fn new_batch_writer(&self) -> Result<Box<dyn LogBatchWriter>> {
        Ok(Box::new(PartitionBatchWriter::new(self.clone())))
    }

    fn register_commit_listener(&self, listener: Arc<Notify>) {
        self.shared.inner.write().listeners.push(listener);
    }

    fn remove_commit_listener(&self, listener: &Arc<Notify>) {
        self.shared
            .inner
            .write()
            .listeners
            .retain(|l| !Arc::ptr_eq(l, listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::{Intent, ValueType};

    fn command(payload: &[u8]) -> PendingRecord {
        PendingRecord::command(1, ValueType(1), Intent(1), payload.to_vec())
    }

    #[test]
    fn positions_are_dense_from_one() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        assert_eq!(log.append(command(b"a")).unwrap(), 1);
        assert_eq!(log.append(command(b"b")).unwrap(), 2);
        assert_eq!(log.committed_position(), 2);
    }

    #[test]
    fn commands_are_stamped_as_their_own_source() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        log.append(command(b"a")).unwrap();
        let records = log.records();
        assert_eq!(records[0].source_position, records[0].position);
    }

    #[test]
    fn explicit_source_position_is_kept() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        log.append(command(b"a")).unwrap();
        let mut follow_up = command(b"b");
        follow_up.source_position = 1;
        follow_up.header.record_type = strand_core::RecordType::Event;
        log.append(follow_up).unwrap();

        let records = log.records();
        assert_eq!(records[1].position, 2);
        assert_eq!(records[1].source_position, 1);
    }

    #[test]
    fn oversized_fragment_is_rejected() {
        let log = PartitionLog::new(
            0,
            PartitionLogConfig {
                max_fragment_size: 8,
            },
        );
        let err = log.append(command(&[0u8; 16])).unwrap_err();
        assert!(matches!(err, EngineError::FragmentTooLarge { size: 16, .. }));
        assert!(log.is_empty());
    }

    #[test]
    fn batch_append_is_all_or_nothing() {
        let log = PartitionLog::new(
            0,
            PartitionLogConfig {
                max_fragment_size: 8,
            },
        );
        let batch = vec![command(b"ok"), command(&[0u8; 16])];
        assert!(log.append_batch(&batch).is_err());
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn commit_listener_is_notified_on_append() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let notify = Arc::new(Notify::new());
        log.register_commit_listener(notify.clone());

        let waiter = {
            let notify = notify.clone();
            tokio::spawn(async move { notify.notified().await })
        };
        log.append(command(b"a")).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("listener should be woken")
            .expect("waiter should not panic");

        log.remove_commit_listener(&notify);
        assert!(log.shared.inner.read().listeners.is_empty());
    }
}
