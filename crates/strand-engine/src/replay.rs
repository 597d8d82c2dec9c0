//! Replay state machine.
//!
//! Brings the state store forward from the snapshot boundary `S` to the
//! last position `L` that was ever written to the log before a crash,
//! without producing new records. Commands are re-applied through their
//! processors with a no-op writer; follow-up records already on the log
//! are consumed without applying, which is what marks their source
//! command as processed.

use crate::context::ProcessingContext;
use crate::health::HealthState;
use crate::writers::NoopFollowUpWriter;
use std::sync::Arc;
use strand_core::{EngineError, LogPosition, Record, Result, TypedRecord};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayState {
    ScanForEnd,
    Replaying { end: LogPosition },
    Done,
}

/// One-shot state machine driving recovery on the processing task.
pub(crate) struct ReplayStateMachine {
    snapshot_position: LogPosition,
    health: Arc<HealthState>,
    state: ReplayState,
}

impl ReplayStateMachine {
    pub(crate) fn new(snapshot_position: LogPosition, health: Arc<HealthState>) -> Self {
        Self {
            snapshot_position,
            health,
            state: ReplayState::ScanForEnd,
        }
    }

    /// Run recovery to completion. The reader must already be positioned
    /// after the snapshot boundary; on success it is left positioned
    /// where steady-state processing starts.
    pub(crate) async fn run(&mut self, ctx: &mut ProcessingContext) -> Result<()> {
        loop {
            match self.state {
                ReplayState::ScanForEnd => {
                    let end = self.scan_for_end_position(ctx)?;
                    if end <= self.snapshot_position {
                        debug!(
                            partition = ctx.partition_id,
                            snapshot = self.snapshot_position,
                            "nothing to replay"
                        );
                        self.state = ReplayState::Done;
                    } else {
                        self.state = ReplayState::Replaying { end };
                    }
                }
                ReplayState::Replaying { end } => {
                    let replayed = self.replay(ctx, end).await?;
                    info!(
                        partition = ctx.partition_id,
                        snapshot = self.snapshot_position,
                        end,
                        replayed,
                        "replay complete"
                    );
                    self.state = ReplayState::Done;
                }
                ReplayState::Done => return Ok(()),
            }
        }
    }

    /// One linear pass over the committed log tracking the highest
    /// source position among follow-up records. A follow-up on the log
    /// proves its command completed the write step before the crash, so
    /// every command up to that position must be re-applied without
    /// emitting; commands past it never wrote anything and are processed
    /// normally afterwards, emitting their follow-ups for the first
    /// time. The pass stops at the committed tail, the first gap after
    /// the highest follow-up source.
    fn scan_for_end_position(&self, ctx: &mut ProcessingContext) -> Result<LogPosition> {
        let mut end = self.snapshot_position;
        while let Some(record) = ctx.reader.next()? {
            if !record.is_command() && record.source_position > end {
                end = record.source_position;
            }
        }
        self.reseek(ctx, self.snapshot_position)?;
        Ok(end)
    }

    async fn replay(&mut self, ctx: &mut ProcessingContext, end: LogPosition) -> Result<u64> {
        let mut replayed = 0u64;
        let mut seen = 0u64;
        loop {
            if ctx.should_abort() {
                return Err(EngineError::Closed);
            }
            let Some(record) = ctx.reader.next()? else {
                break;
            };
            if record.position > end {
                // Reposition so steady-state processing resumes right
                // after the replayed range.
                self.reseek(ctx, end)?;
                break;
            }
            if record.is_command() {
                self.replay_command(ctx, &record)?;
                replayed += 1;
            }
            // Follow-up records are consumed without applying.

            seen += 1;
            if seen % 64 == 0 {
                self.health.maybe_tick();
                tokio::task::yield_now().await;
            }
        }
        Ok(replayed)
    }

    fn replay_command(&self, ctx: &mut ProcessingContext, record: &Record) -> Result<()> {
        let mut txn = ctx.store.begin()?;
        if let Some(processor) = ctx
            .processors
            .get_mut(record.header.value_type, record.header.intent)
        {
            let value = ctx.values.load(record.header.value_type, &record.payload);
            let typed = TypedRecord::new(record, value);
            let mut writer = NoopFollowUpWriter;
            if let Err(e) = processor.process(&typed, &mut writer, txn.as_mut()) {
                txn.rollback();
                return Err(EngineError::Recovery {
                    partition: ctx.partition_id,
                    reason: format!("replay of record at position {} failed: {e}", record.position),
                });
            }
        }
        // A registry miss is acknowledged by committing the position
        // alone.
        txn.commit(record.position)
    }

    fn reseek(&self, ctx: &mut ProcessingContext, position: LogPosition) -> Result<()> {
        if !ctx.reader.seek_to_next_event(position)? {
            return Err(EngineError::Recovery {
                partition: ctx.partition_id,
                reason: format!("log no longer contains position {position}"),
            });
        }
        Ok(())
    }
}
