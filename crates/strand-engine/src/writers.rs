//! Follow-up writers handed to record processors.

use strand_core::{
    EngineError, FollowUpWriter, Intent, LogBatchWriter, LogPosition, PendingRecord, RecordHeader,
    RecordType, Result, ValueType,
};

/// Stages follow-up records into the log batch writer, stamping the
/// position of the record being processed as their source.
pub(crate) struct BatchedFollowUpWriter<'a> {
    writer: &'a mut dyn LogBatchWriter,
    source_position: LogPosition,
    max_fragment_size: usize,
}

impl<'a> BatchedFollowUpWriter<'a> {
    pub(crate) fn new(
        writer: &'a mut dyn LogBatchWriter,
        source_position: LogPosition,
        max_fragment_size: usize,
    ) -> Self {
        Self {
            writer,
            source_position,
            max_fragment_size,
        }
    }

    fn stage(
        &mut self,
        record_type: RecordType,
        key: i64,
        value_type: ValueType,
        intent: Intent,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > self.max_fragment_size {
            return Err(EngineError::FragmentTooLarge {
                size: payload.len(),
                max: self.max_fragment_size,
            });
        }
        self.writer.append(PendingRecord {
            source_position: self.source_position,
            key,
            header: RecordHeader {
                record_type,
                value_type,
                intent,
            },
            payload: payload.to_vec(),
        })
    }
}

impl FollowUpWriter for BatchedFollowUpWriter<'_> {
    fn append_follow_up(
        &mut self,
        key: i64,
        value_type: ValueType,
        intent: Intent,
        payload: &[u8],
    ) -> Result<()> {
        self.stage(RecordType::Event, key, value_type, intent, payload)
    }

    fn append_rejection(
        &mut self,
        key: i64,
        value_type: ValueType,
        intent: Intent,
        payload: &[u8],
    ) -> Result<()> {
        self.stage(RecordType::Rejection, key, value_type, intent, payload)
    }
}

/// Replay-mode writer: processors run their normal code, nothing is
/// emitted.
pub(crate) struct NoopFollowUpWriter;

impl FollowUpWriter for NoopFollowUpWriter {
    fn append_follow_up(
        &mut self,
        _key: i64,
        _value_type: ValueType,
        _intent: Intent,
        _payload: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    fn append_rejection(
        &mut self,
        _key: i64,
        _value_type: ValueType,
        _intent: Intent,
        _payload: &[u8],
    ) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_log::{PartitionLog, PartitionLogConfig};
    use strand_core::LogStream;

    #[tokio::test]
    async fn staged_follow_ups_carry_the_source_position() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let mut batch = log.new_batch_writer().await.unwrap();

        let mut writer = BatchedFollowUpWriter::new(batch.as_mut(), 7, 1024);
        writer
            .append_follow_up(1, ValueType(1), Intent(2), b"ok")
            .unwrap();
        writer
            .append_rejection(1, ValueType(1), Intent(3), b"no")
            .unwrap();

        batch.flush().unwrap();
        let records = log.records();
        assert_eq!(records[0].source_position, 7);
        assert_eq!(records[0].header.record_type, RecordType::Event);
        assert_eq!(records[1].source_position, 7);
        assert_eq!(records[1].header.record_type, RecordType::Rejection);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected_before_staging() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let mut batch = log.new_batch_writer().await.unwrap();

        let mut writer = BatchedFollowUpWriter::new(batch.as_mut(), 7, 4);
        let err = writer
            .append_follow_up(1, ValueType(1), Intent(2), b"too large")
            .unwrap_err();
        assert!(matches!(err, EngineError::FragmentTooLarge { .. }));
        assert_eq!(batch.pending(), 0);
    }

    #[test]
    fn noop_writer_swallows_everything() {
        let mut writer = NoopFollowUpWriter;
        writer
            .append_follow_up(1, ValueType(1), Intent(2), b"x")
            .unwrap();
        writer
            .append_rejection(1, ValueType(1), Intent(3), b"y")
            .unwrap();
    }
}
