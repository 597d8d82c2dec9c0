use crate::stream::PartitionLog;
use strand_core::{EngineError, LogBatchWriter, LogPosition, PendingRecord, Result};

/// Stages records and appends them to a [`PartitionLog`] in one atomic
/// batch.
pub struct PartitionBatchWriter {
    log: PartitionLog,
    staged: Vec<PendingRecord>,
    max_fragment_size: usize,
}

impl PartitionBatchWriter {
    pub(crate) fn new(log: PartitionLog) -> Self {
        let max_fragment_size = log.max_fragment_size();
        Self {
            log,
            staged: Vec::new(),
            max_fragment_size,
        }
    }
}

impl LogBatchWriter for PartitionBatchWriter {
    fn max_fragment_size(&self) -> usize {
        self.max_fragment_size
    }

    fn append(&mut self, record: PendingRecord) -> Result<()> {
        if record.payload.len() > self.max_fragment_size {
            return Err(EngineError::FragmentTooLarge {
                size: record.payload.len(),
                max: self.max_fragment_size,
            });
        }
        self.staged.push(record);
        Ok(())
    }

    fn pending(&self) -> usize {
        self.staged.len()
    }

    fn flush(&mut self) -> Result<Option<LogPosition>> {
        if self.staged.is_empty() {
            return Ok(None);
        }
        let highest = self.log.append_batch(&self.staged)?;
        self.staged.clear();
        Ok(highest)
    }

    fn reset(&mut self) {
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartitionLogConfig;
    use strand_core::{Intent, LogStream, RecordHeader, RecordType, ValueType};

    fn follow_up(source: LogPosition, payload: &[u8]) -> PendingRecord {
        PendingRecord {
            source_position: source,
            key: 0,
            header: RecordHeader {
                record_type: RecordType::Event,
                value_type: ValueType(1),
                intent: Intent(2),
            },
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn flush_appends_the_whole_batch_and_returns_highest() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let mut writer = log.new_batch_writer().await.unwrap();

        writer.append(follow_up(1, b"a")).unwrap();
        writer.append(follow_up(1, b"b")).unwrap();
        assert_eq!(writer.pending(), 2);

        assert_eq!(writer.flush().unwrap(), Some(2));
        assert_eq!(writer.pending(), 0);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn flush_of_empty_stage_is_a_noop() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let mut writer = log.new_batch_writer().await.unwrap();
        assert_eq!(writer.flush().unwrap(), None);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn reset_discards_the_stage() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let mut writer = log.new_batch_writer().await.unwrap();
        writer.append(follow_up(1, b"a")).unwrap();
        writer.reset();
        assert_eq!(writer.flush().unwrap(), None);
        assert!(log.is_empty());
    }
}
