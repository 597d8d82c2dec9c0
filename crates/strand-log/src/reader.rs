use crate::stream::LogShared;
use std::sync::Arc;
use strand_core::{LogPosition, LogReader, Record, Result, UNSET_POSITION};

/// Cursor over the committed records of one [`PartitionLog`](crate::PartitionLog).
///
/// The cursor is an index into the shared record vector; records beyond
/// the committed position are invisible.
pub struct PartitionLogReader {
    shared: Arc<LogShared>,
    next_index: usize,
}

impl PartitionLogReader {
    pub(crate) fn new(shared: Arc<LogShared>) -> Self {
        Self {
            shared,
            next_index: 0,
        }
    }
}

impl LogReader for PartitionLogReader {
    fn seek_to_next_event(&mut self, position: LogPosition) -> Result<bool> {
        if position == UNSET_POSITION {
            self.next_index = 0;
            return Ok(true);
        }

        let inner = self.shared.inner.read();
        // A compacted prefix is fine: seeking below the oldest retained
        // record lands on the first retained one. Only a log holding
        // nothing at or past `position` fails the seek.
        let found = inner.records.iter().any(|r| r.position >= position);
        if !found {
            return Ok(false);
        }
        self.next_index = inner.records.partition_point(|r| r.position <= position);
        Ok(true)
    }

    fn has_next(&self) -> bool {
        let inner = self.shared.inner.read();
        inner
            .records
            .get(self.next_index)
            .map(|r| r.position <= inner.committed_position)
            .unwrap_or(false)
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let inner = self.shared.inner.read();
        match inner.records.get(self.next_index) {
            Some(record) if record.position <= inner.committed_position => {
                self.next_index += 1;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{PartitionLog, PartitionLogConfig};
    use strand_core::{Intent, LogStream, PendingRecord, ValueType, UNSET_POSITION};

    fn log_with(n: usize) -> PartitionLog {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        for i in 0..n {
            log.append(PendingRecord::command(
                i as i64,
                ValueType(1),
                Intent(1),
                Vec::new(),
            ))
            .unwrap();
        }
        log
    }

    #[tokio::test]
    async fn seek_to_unset_positions_at_start() {
        let log = log_with(3);
        let mut reader = log.new_reader().await.unwrap();
        assert!(reader.seek_to_next_event(UNSET_POSITION).unwrap());
        assert_eq!(reader.next().unwrap().unwrap().position, 1);
    }

    #[tokio::test]
    async fn seek_lands_strictly_after_the_given_position() {
        let log = log_with(3);
        let mut reader = log.new_reader().await.unwrap();
        assert!(reader.seek_to_next_event(1).unwrap());
        assert_eq!(reader.next().unwrap().unwrap().position, 2);
    }

    #[tokio::test]
    async fn seek_past_the_tail_fails() {
        let log = log_with(3);
        let mut reader = log.new_reader().await.unwrap();
        assert!(!reader.seek_to_next_event(42).unwrap());
    }

    #[tokio::test]
    async fn seek_on_empty_log_fails_for_real_positions() {
        let log = log_with(0);
        let mut reader = log.new_reader().await.unwrap();
        assert!(reader.seek_to_next_event(UNSET_POSITION).unwrap());
        assert!(!reader.seek_to_next_event(1).unwrap());
    }

    #[tokio::test]
    async fn reader_sees_records_appended_after_creation() {
        let log = log_with(0);
        let mut reader = log.new_reader().await.unwrap();
        assert!(!reader.has_next());

        log.append(PendingRecord::command(0, ValueType(1), Intent(1), Vec::new()))
            .unwrap();
        assert!(reader.has_next());
        assert_eq!(reader.next().unwrap().unwrap().position, 1);
        assert!(reader.next().unwrap().is_none());
    }
}
