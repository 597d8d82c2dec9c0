//! Processing state machine.
//!
//! The steady-state loop: read one record, dispatch to its processor,
//! append the staged follow-ups in one batch, then commit the state
//! transaction carrying the record's position. The batch is appended
//! before the transaction commits, so a crash in between leaves the
//! follow-ups on the log and replay treats the record as processed.

use crate::context::ProcessingContext;
use crate::health::HealthState;
use crate::writers::BatchedFollowUpWriter;
use std::sync::Arc;
use std::time::Duration;
use strand_core::{
    observe, EngineError, LogPosition, Record, Result, RetryConfig, TypedRecord, UNSET_POSITION,
};
use tracing::{debug, warn};

/// What one iteration did; the supervisor decides how to continue.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// A record was processed and committed.
    Processed,
    /// A record without a processor was advanced past.
    Skipped,
    /// Nothing to read; wait for the next commit-position update.
    Idle,
    /// A transient failure; retry the same record after the delay.
    Retry { delay: Duration },
}

pub(crate) struct ProcessingStateMachine {
    retry: RetryConfig,
    health: Arc<HealthState>,
    last_processed: LogPosition,
    last_written: LogPosition,
    /// Record held back for a retry; read again before the reader.
    in_flight: Option<Record>,
    attempts: u32,
}

impl ProcessingStateMachine {
    pub(crate) fn new(
        retry: RetryConfig,
        health: Arc<HealthState>,
        last_processed: LogPosition,
    ) -> Self {
        health.set_positions(last_processed, UNSET_POSITION);
        Self {
            retry,
            health,
            last_processed,
            last_written: UNSET_POSITION,
            in_flight: None,
            attempts: 0,
        }
    }

    pub(crate) fn last_processed(&self) -> LogPosition {
        self.last_processed
    }

    pub(crate) fn last_written(&self) -> LogPosition {
        self.last_written
    }

    /// Run one iteration. Fatal errors bubble up and fail the engine.
    pub(crate) fn process_next(&mut self, ctx: &mut ProcessingContext) -> Result<StepOutcome> {
        let record = match self.in_flight.take() {
            Some(record) => record,
            None => match ctx.reader.next()? {
                Some(record) => record,
                None => {
                    self.health.set_idle(true);
                    return Ok(StepOutcome::Idle);
                }
            },
        };
        self.health.set_idle(false);

        let header = record.header;
        if ctx.processors.get_mut(header.value_type, header.intent).is_none() {
            return self.skip(ctx, record);
        }

        match self.apply(ctx, &record) {
            Ok(()) => {
                self.attempts = 0;
                self.advance(record.position);
                observe::record_processed(ctx.partition_id);
                Ok(StepOutcome::Processed)
            }
            Err(e) if e.is_retryable() && self.attempts < self.retry.max_retries => {
                self.attempts += 1;
                let delay = self.retry.delay_for_attempt(self.attempts);
                warn!(
                    partition = ctx.partition_id,
                    position = record.position,
                    attempt = self.attempts,
                    ?delay,
                    error = %e,
                    "transient processing error, retrying"
                );
                self.in_flight = Some(record);
                Ok(StepOutcome::Retry { delay })
            }
            Err(e) => Err(e),
        }
    }

    /// Advance past a record nobody handles. Unknown commands persist
    /// the position through an empty transaction, so recovery stays
    /// deterministic across arbitrarily long skip runs. Follow-up
    /// records advance in memory only; their source command's commit
    /// already acknowledged them.
    fn skip(&mut self, ctx: &mut ProcessingContext, record: Record) -> Result<StepOutcome> {
        if record.is_command() {
            let txn = ctx.store.begin()?;
            txn.commit(record.position)?;
        }
        self.advance(record.position);
        debug!(
            partition = ctx.partition_id,
            position = record.position,
            value_type = ?record.header.value_type,
            intent = ?record.header.intent,
            "no processor registered, skipped"
        );
        observe::record_skipped(ctx.partition_id);
        Ok(StepOutcome::Skipped)
    }

    fn apply(&mut self, ctx: &mut ProcessingContext, record: &Record) -> Result<()> {
        let mut txn = ctx.store.begin()?;
        ctx.writer.reset();

        let value = ctx.values.load(record.header.value_type, &record.payload);
        let typed = TypedRecord::new(record, value);
        let Some(processor) = ctx
            .processors
            .get_mut(record.header.value_type, record.header.intent)
        else {
            txn.rollback();
            return Err(EngineError::InvalidState(
                "processor disappeared mid-iteration".into(),
            ));
        };

        let mut writer =
            BatchedFollowUpWriter::new(ctx.writer.as_mut(), record.position, ctx.max_fragment_size);
        if let Err(e) = processor.process(&typed, &mut writer, txn.as_mut()) {
            txn.rollback();
            ctx.writer.reset();
            return Err(e);
        }

        // Append before the store commit (never the other way around):
        // follow-ups on the log are how replay knows this record was
        // processed.
        let staged = ctx.writer.pending();
        match ctx.writer.flush() {
            Ok(Some(position)) => {
                self.last_written = position;
                observe::record_written(ctx.partition_id, staged as u64);
            }
            Ok(None) => {}
            Err(e) => {
                txn.rollback();
                ctx.writer.reset();
                return Err(EngineError::retryable(
                    record.position,
                    format!("log append failed: {e}"),
                ));
            }
        }

        txn.commit(record.position)
    }

    fn advance(&mut self, position: LogPosition) {
        self.last_processed = position;
        self.health.set_positions(self.last_processed, self.last_written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::RecordValues;
    use std::sync::atomic::AtomicBool;
    use strand_core::{
        FollowUpWriter, Intent, LogStream, PendingRecord, RecordProcessor, RecordProcessorMap,
        StateStore, StateTxn, ValueType,
    };
    use strand_log::{PartitionLog, PartitionLogConfig};
    use strand_store::MemoryStateStore;

    const COUNTER: ValueType = ValueType(1);
    const INCREMENT: Intent = Intent(1);
    const INCREMENTED: Intent = Intent(2);

    struct IncrementProcessor {
        fail_remaining: u32,
    }

    impl RecordProcessor for IncrementProcessor {
        fn process(
            &mut self,
            record: &TypedRecord<'_>,
            writer: &mut dyn FollowUpWriter,
            txn: &mut dyn StateTxn,
        ) -> Result<()> {
            if self.fail_remaining > 0 {
                self.fail_remaining -= 1;
                return Err(EngineError::retryable(record.position, "induced"));
            }
            let count = txn
                .get(b"count")?
                .map(|b| u64::from_le_bytes(b.try_into().unwrap_or_default()))
                .unwrap_or(0);
            txn.put(b"count", &(count + 1).to_le_bytes())?;
            writer.append_follow_up(record.key, COUNTER, INCREMENTED, record.value_bytes())
        }
    }

    async fn context(
        log: &PartitionLog,
        store: &MemoryStateStore,
        fail_remaining: u32,
    ) -> (ProcessingContext, ProcessingStateMachine) {
        let mut processors = RecordProcessorMap::new();
        processors
            .try_register(COUNTER, INCREMENT, Box::new(IncrementProcessor { fail_remaining }))
            .unwrap();

        let writer = log.new_batch_writer().await.unwrap();
        let max_fragment_size = writer.max_fragment_size();
        let mut reader = log.new_reader().await.unwrap();
        reader.seek_to_next_event(UNSET_POSITION).unwrap();

        let health = Arc::new(HealthState::new(Duration::from_secs(5)));
        let sm = ProcessingStateMachine::new(RetryConfig::default(), health, UNSET_POSITION);
        let ctx = ProcessingContext {
            partition_id: 0,
            log_stream: Arc::new(log.clone()),
            reader,
            writer,
            max_fragment_size,
            processors,
            store: Arc::new(store.clone()),
            values: RecordValues::new(),
            opened: Arc::new(AtomicBool::new(true)),
        };
        (ctx, sm)
    }

    #[tokio::test]
    async fn one_iteration_writes_then_commits() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let store = MemoryStateStore::new();
        log.append(PendingRecord::command(1, COUNTER, INCREMENT, b"{}".to_vec()))
            .unwrap();

        let (mut ctx, mut sm) = context(&log, &store, 0).await;
        assert!(matches!(
            sm.process_next(&mut ctx).unwrap(),
            StepOutcome::Processed
        ));

        assert_eq!(sm.last_processed(), 1);
        assert_eq!(sm.last_written(), 2);
        assert_eq!(store.last_processed_position().unwrap(), 1);
        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].source_position, 1);
    }

    #[tokio::test]
    async fn empty_log_is_idle() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let store = MemoryStateStore::new();
        let (mut ctx, mut sm) = context(&log, &store, 0).await;
        assert!(matches!(sm.process_next(&mut ctx).unwrap(), StepOutcome::Idle));
        assert_eq!(sm.last_processed(), UNSET_POSITION);
    }

    #[tokio::test]
    async fn unknown_command_is_skipped_and_persisted() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let store = MemoryStateStore::new();
        log.append(PendingRecord::command(1, ValueType(99), Intent(1), Vec::new()))
            .unwrap();

        let (mut ctx, mut sm) = context(&log, &store, 0).await;
        assert!(matches!(
            sm.process_next(&mut ctx).unwrap(),
            StepOutcome::Skipped
        ));
        assert_eq!(sm.last_processed(), 1);
        assert_eq!(store.last_processed_position().unwrap(), 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn transient_error_retries_the_same_record() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let store = MemoryStateStore::new();
        log.append(PendingRecord::command(1, COUNTER, INCREMENT, b"{}".to_vec()))
            .unwrap();

        let (mut ctx, mut sm) = context(&log, &store, 2).await;
        assert!(matches!(
            sm.process_next(&mut ctx).unwrap(),
            StepOutcome::Retry { .. }
        ));
        // Nothing happened yet
        assert_eq!(store.last_processed_position().unwrap(), UNSET_POSITION);
        assert_eq!(log.len(), 1);

        assert!(matches!(
            sm.process_next(&mut ctx).unwrap(),
            StepOutcome::Retry { .. }
        ));
        assert!(matches!(
            sm.process_next(&mut ctx).unwrap(),
            StepOutcome::Processed
        ));
        assert_eq!(store.last_processed_position().unwrap(), 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_turn_fatal() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let store = MemoryStateStore::new();
        log.append(PendingRecord::command(1, COUNTER, INCREMENT, b"{}".to_vec()))
            .unwrap();

        let mut processors = RecordProcessorMap::new();
        processors
            .try_register(
                COUNTER,
                INCREMENT,
                Box::new(IncrementProcessor {
                    fail_remaining: u32::MAX,
                }),
            )
            .unwrap();

        let writer = log.new_batch_writer().await.unwrap();
        let max_fragment_size = writer.max_fragment_size();
        let mut reader = log.new_reader().await.unwrap();
        reader.seek_to_next_event(UNSET_POSITION).unwrap();
        let health = Arc::new(HealthState::new(Duration::from_secs(5)));
        let mut sm = ProcessingStateMachine::new(
            RetryConfig::default().with_max_retries(2).with_initial_delay_ms(1),
            health,
            UNSET_POSITION,
        );
        let mut ctx = ProcessingContext {
            partition_id: 0,
            log_stream: Arc::new(log.clone()),
            reader,
            writer,
            max_fragment_size,
            processors,
            store: Arc::new(store.clone()),
            values: RecordValues::new(),
            opened: Arc::new(AtomicBool::new(true)),
        };

        assert!(matches!(sm.process_next(&mut ctx).unwrap(), StepOutcome::Retry { .. }));
        assert!(matches!(sm.process_next(&mut ctx).unwrap(), StepOutcome::Retry { .. }));
        assert!(sm.process_next(&mut ctx).is_err());
    }

    #[tokio::test]
    async fn follow_up_records_advance_in_memory_only() {
        let log = PartitionLog::new(0, PartitionLogConfig::default());
        let store = MemoryStateStore::new();
        log.append(PendingRecord::command(1, COUNTER, INCREMENT, b"{}".to_vec()))
            .unwrap();

        let (mut ctx, mut sm) = context(&log, &store, 0).await;
        assert!(matches!(sm.process_next(&mut ctx).unwrap(), StepOutcome::Processed));

        // The follow-up written above is next on the log.
        assert!(matches!(sm.process_next(&mut ctx).unwrap(), StepOutcome::Skipped));
        assert_eq!(sm.last_processed(), 2);
        assert_eq!(store.last_processed_position().unwrap(), 1);
    }
}
