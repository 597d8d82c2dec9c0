//! Stream processor supervisor.
//!
//! The outer lifecycle owner: wires the collaborators, drives recovery,
//! runs the steady-state loop on one spawned task, and exposes
//! pause/resume, position getters and health. All mutable engine state
//! lives on the task; the [`StreamProcessor`] handle enqueues commands
//! and resolves them with futures.

use crate::context::ProcessingContext;
use crate::health::{FailureListener, HealthMonitorable, HealthState, HealthStatus, Phase};
use crate::processing::{ProcessingStateMachine, StepOutcome};
use crate::replay::ReplayStateMachine;
use crate::values::RecordValues;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strand_core::{
    observe, EngineConfig, EngineError, LogPosition, LogStream, PartitionId, RecordProcessorMap,
    Result, StateStore,
};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info};

type SharedFailureListener = Arc<Mutex<Option<Box<dyn FailureListener>>>>;

enum Command {
    LastProcessed(oneshot::Sender<LogPosition>),
    LastWritten(oneshot::Sender<LogPosition>),
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Collaborators handed to the processing task on open.
struct ActorSeed {
    log_stream: Arc<dyn LogStream>,
    store: Arc<dyn StateStore>,
    processors: RecordProcessorMap,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Builder for a [`StreamProcessor`]
pub struct StreamProcessorBuilder {
    log_stream: Option<Arc<dyn LogStream>>,
    store: Option<Arc<dyn StateStore>>,
    processors: RecordProcessorMap,
    config: EngineConfig,
}

impl StreamProcessorBuilder {
    pub fn new() -> Self {
        Self {
            log_stream: None,
            store: None,
            processors: RecordProcessorMap::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn log_stream(mut self, log_stream: Arc<dyn LogStream>) -> Self {
        self.log_stream = Some(log_stream);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn processors(mut self, processors: RecordProcessorMap) -> Self {
        self.processors = processors;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<StreamProcessor> {
        let log_stream = self
            .log_stream
            .ok_or_else(|| EngineError::InvalidState("log stream not configured".into()))?;
        let store = self
            .store
            .ok_or_else(|| EngineError::InvalidState("state store not configured".into()))?;

        let partition_id = log_stream.partition_id();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthState::new(self.config.health_tick_interval()));

        Ok(StreamProcessor {
            partition_id,
            config: self.config,
            is_opened: Arc::new(AtomicBool::new(false)),
            health,
            commands: commands_tx,
            failure_listener: Arc::new(Mutex::new(None)),
            seed: Mutex::new(Some(ActorSeed {
                log_stream,
                store,
                processors: self.processors,
                commands: commands_rx,
            })),
        })
    }
}

impl Default for StreamProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one per-partition stream processing engine.
///
/// All operations that touch engine state are resolved on the processing
/// task; they observe a snapshot between iterations, never
/// mid-iteration.
pub struct StreamProcessor {
    partition_id: PartitionId,
    config: EngineConfig,
    is_opened: Arc<AtomicBool>,
    health: Arc<HealthState>,
    commands: mpsc::UnboundedSender<Command>,
    failure_listener: SharedFailureListener,
    seed: Mutex<Option<ActorSeed>>,
}

impl StreamProcessor {
    pub fn builder() -> StreamProcessorBuilder {
        StreamProcessorBuilder::new()
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn is_opened(&self) -> bool {
        self.is_opened.load(Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.health.phase() == Phase::Failed
    }

    pub fn phase(&self) -> Phase {
        self.health.phase()
    }

    /// Open the engine: spawn the processing task, recover from the
    /// snapshot boundary and start processing.
    ///
    /// Completes once recovery succeeded and the engine is processing,
    /// or exceptionally when start-up or recovery failed.
    pub async fn open(&self) -> Result<()> {
        if self
            .is_opened
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::InvalidState(
                "stream processor already opened".into(),
            ));
        }
        let Some(seed) = self.seed.lock().take() else {
            self.is_opened.store(false, Ordering::SeqCst);
            return Err(EngineError::InvalidState(
                "stream processor cannot be reopened".into(),
            ));
        };

        let (open_tx, open_rx) = oneshot::channel();
        let actor = ProcessorActor {
            partition_id: self.partition_id,
            config: self.config.clone(),
            is_opened: self.is_opened.clone(),
            health: self.health.clone(),
            failure_listener: self.failure_listener.clone(),
            commands: seed.commands,
            commit_notify: Arc::new(Notify::new()),
            should_process: true,
            close_acks: Vec::new(),
        };
        tokio::spawn(actor.run(seed.log_stream, seed.store, seed.processors, open_tx));

        match open_rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Closed),
        }
    }

    /// Close the engine and release its resources. Idempotent; never
    /// fails.
    pub async fn close(&self) {
        if self
            .is_opened
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Suspend processing after the in-flight record completes.
    pub async fn pause_processing(&self) -> Result<()> {
        self.call(Command::Pause).await
    }

    /// Resume processing after a pause.
    pub async fn resume_processing(&self) -> Result<()> {
        self.call(Command::Resume).await
    }

    /// Position of the last record whose effects were committed.
    pub async fn last_processed_position(&self) -> Result<LogPosition> {
        self.call(Command::LastProcessed).await
    }

    /// Highest position this engine wrote to the log.
    pub async fn last_written_position(&self) -> Result<LogPosition> {
        self.call(Command::LastWritten).await
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        if !self.is_opened() {
            return Err(EngineError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }
}

impl HealthMonitorable for StreamProcessor {
    fn health_status(&self) -> HealthStatus {
        self.health.status()
    }

    fn add_failure_listener(&self, listener: Box<dyn FailureListener>) {
        *self.failure_listener.lock() = Some(listener);
    }
}

/// The processing task. Owns the context, both state machines and the
/// control plane; everything here runs on one spawned task.
struct ProcessorActor {
    partition_id: PartitionId,
    config: EngineConfig,
    is_opened: Arc<AtomicBool>,
    health: Arc<HealthState>,
    failure_listener: SharedFailureListener,
    commands: mpsc::UnboundedReceiver<Command>,
    commit_notify: Arc<Notify>,
    should_process: bool,
    close_acks: Vec<oneshot::Sender<()>>,
}

impl ProcessorActor {
    async fn run(
        mut self,
        log_stream: Arc<dyn LogStream>,
        store: Arc<dyn StateStore>,
        processors: RecordProcessorMap,
        open_tx: oneshot::Sender<Result<()>>,
    ) {
        let recovery_start = Instant::now();
        let (mut ctx, snapshot_position) = match self.start(log_stream, store, processors).await {
            Ok(started) => started,
            Err(e) => {
                self.fail_open(e, open_tx);
                return;
            }
        };

        let mut replay = ReplayStateMachine::new(snapshot_position, self.health.clone());
        if let Err(e) = replay.run(&mut ctx).await {
            match e {
                EngineError::Closed => {
                    self.teardown(&mut ctx);
                    let _ = open_tx.send(Err(EngineError::Closed));
                }
                e => {
                    error!(partition = self.partition_id, error = %e, "recovery failed");
                    self.on_failure(&mut ctx);
                    let _ = open_tx.send(Err(e));
                }
            }
            self.finish();
            return;
        }

        let last_processed = match ctx.store.last_processed_position() {
            Ok(position) => position,
            Err(e) => {
                error!(partition = self.partition_id, error = %e, "recovery failed");
                self.on_failure(&mut ctx);
                let _ = open_tx.send(Err(e));
                self.finish();
                return;
            }
        };
        let mut sm = ProcessingStateMachine::new(
            self.config.retry.clone(),
            self.health.clone(),
            last_processed,
        );

        observe::record_recovery_time(self.partition_id, recovery_start.elapsed());
        self.on_recovered(&mut ctx);
        let _ = open_tx.send(Ok(()));

        self.event_loop(&mut ctx, &mut sm).await;
        self.finish();
    }

    /// The starting/started hooks: acquire the batch writer, then the
    /// reader, recover the snapshot boundary from the store, position
    /// the reader and open the processors.
    async fn start(
        &mut self,
        log_stream: Arc<dyn LogStream>,
        store: Arc<dyn StateStore>,
        mut processors: RecordProcessorMap,
    ) -> Result<(ProcessingContext, LogPosition)> {
        let writer = log_stream.new_batch_writer().await?;
        let max_fragment_size = writer.max_fragment_size();
        debug!(
            partition = self.partition_id,
            max_fragment_size, "acquired batch writer"
        );
        let mut reader = log_stream.new_reader().await?;

        let snapshot_position = store.last_processed_position()?;
        if !reader.seek_to_next_event(snapshot_position)? {
            return Err(EngineError::SnapshotNotFound {
                partition: self.partition_id,
                position: snapshot_position,
            });
        }
        info!(
            partition = self.partition_id,
            snapshot = snapshot_position,
            "recovering from snapshot"
        );

        processors.notify_open();
        self.health.record_tick();

        let ctx = ProcessingContext {
            partition_id: self.partition_id,
            log_stream,
            reader,
            writer,
            max_fragment_size,
            processors,
            store,
            values: RecordValues::new(),
            opened: self.is_opened.clone(),
        };
        Ok((ctx, snapshot_position))
    }

    async fn event_loop(&mut self, ctx: &mut ProcessingContext, sm: &mut ProcessingStateMachine) {
        loop {
            while let Ok(cmd) = self.commands.try_recv() {
                self.handle_command(cmd, ctx, sm);
            }
            if ctx.should_abort() {
                self.teardown(ctx);
                return;
            }
            self.health.maybe_tick();

            if !self.should_process {
                self.wait_while_paused(ctx, sm).await;
                continue;
            }

            match sm.process_next(ctx) {
                Ok(StepOutcome::Processed) | Ok(StepOutcome::Skipped) => {
                    // Cooperative yield between iterations.
                    tokio::task::yield_now().await;
                }
                Ok(StepOutcome::Idle) => {
                    self.wait_for_event(ctx, sm).await;
                }
                Ok(StepOutcome::Retry { delay }) => {
                    self.wait_for_retry(delay, ctx, sm).await;
                }
                Err(e) => {
                    error!(
                        partition = self.partition_id,
                        error = %e,
                        "unrecoverable processing error"
                    );
                    self.on_failure(ctx);
                    return;
                }
            }
        }
    }

    /// Idle: suspend until a commit-position update, a command or the
    /// next health tick.
    async fn wait_for_event(&mut self, ctx: &mut ProcessingContext, sm: &mut ProcessingStateMachine) {
        let notify = self.commit_notify.clone();
        tokio::select! {
            cmd = self.commands.recv() => {
                match cmd {
                    Some(cmd) => self.handle_command(cmd, ctx, sm),
                    // The handle is gone; nobody can close us anymore.
                    None => self.is_opened.store(false, Ordering::SeqCst),
                }
            }
            _ = notify.notified() => {}
            _ = tokio::time::sleep(self.health.tick_remaining()) => {
                self.health.record_tick();
            }
        }
    }

    /// Retrying: suspend for the backoff delay, still serving commands
    /// and health ticks. Pause or close cut the wait short.
    async fn wait_for_retry(
        &mut self,
        delay: Duration,
        ctx: &mut ProcessingContext,
        sm: &mut ProcessingStateMachine,
    ) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, ctx, sm),
                        None => {
                            self.is_opened.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    if ctx.should_abort() || !self.should_process {
                        return;
                    }
                }
                _ = tokio::time::sleep(self.health.tick_remaining()) => {
                    self.health.record_tick();
                }
            }
        }
    }

    /// Paused: only commands and health ticks wake the task.
    async fn wait_while_paused(
        &mut self,
        ctx: &mut ProcessingContext,
        sm: &mut ProcessingStateMachine,
    ) {
        tokio::select! {
            cmd = self.commands.recv() => {
                match cmd {
                    Some(cmd) => self.handle_command(cmd, ctx, sm),
                    None => self.is_opened.store(false, Ordering::SeqCst),
                }
            }
            _ = tokio::time::sleep(self.health.tick_remaining()) => {
                self.health.record_tick();
            }
        }
    }

    fn handle_command(
        &mut self,
        cmd: Command,
        ctx: &mut ProcessingContext,
        sm: &mut ProcessingStateMachine,
    ) {
        match cmd {
            Command::LastProcessed(tx) => {
                let _ = tx.send(sm.last_processed());
            }
            Command::LastWritten(tx) => {
                let _ = tx.send(sm.last_written());
            }
            Command::Pause(tx) => {
                if self.should_process {
                    info!(partition = self.partition_id, "pausing processing");
                    ctx.processors.notify_paused();
                    self.should_process = false;
                    self.health.set_phase(Phase::Paused);
                }
                let _ = tx.send(());
            }
            Command::Resume(tx) => {
                if !self.should_process {
                    info!(partition = self.partition_id, "resuming processing");
                    ctx.processors.notify_resumed();
                    self.should_process = true;
                    self.health.set_phase(Phase::Processing);
                }
                let _ = tx.send(());
            }
            Command::Close(tx) => {
                self.close_acks.push(tx);
            }
        }
    }

    fn on_recovered(&mut self, ctx: &mut ProcessingContext) {
        self.health.set_phase(Phase::Processing);
        ctx.log_stream
            .register_commit_listener(self.commit_notify.clone());
        ctx.processors.notify_recovered();
        info!(partition = self.partition_id, "recovered, processing");
    }

    /// Start-up never got as far as building the context. Recovery
    /// errors still count as a failure; anything else is a lifecycle
    /// error that just closes the task.
    fn fail_open(&mut self, e: EngineError, open_tx: oneshot::Sender<Result<()>>) {
        match &e {
            EngineError::SnapshotNotFound { .. } | EngineError::Recovery { .. } => {
                error!(partition = self.partition_id, error = %e, "recovery failed");
                self.health.set_phase(Phase::Failed);
                self.notify_failure_listener();
            }
            _ => {
                error!(partition = self.partition_id, error = %e, "start-up failed");
                self.health.set_phase(Phase::Closed);
            }
        }
        self.is_opened.store(false, Ordering::SeqCst);
        let _ = open_tx.send(Err(e));
        self.finish();
    }

    fn on_failure(&mut self, ctx: &mut ProcessingContext) {
        self.health.set_phase(Phase::Failed);
        self.is_opened.store(false, Ordering::SeqCst);
        ctx.processors.notify_failed();
        ctx.log_stream.remove_commit_listener(&self.commit_notify);
        self.notify_failure_listener();
    }

    fn notify_failure_listener(&mut self) {
        if let Some(listener) = self.failure_listener.lock().take() {
            listener.on_failure();
        }
    }

    /// Orderly shutdown observed through the abort condition.
    fn teardown(&mut self, ctx: &mut ProcessingContext) {
        if self.health.phase() != Phase::Failed {
            ctx.processors.notify_close();
            self.health.set_phase(Phase::Closed);
        }
        ctx.log_stream.remove_commit_listener(&self.commit_notify);
        debug!(partition = self.partition_id, "stream processor closed");
    }

    /// Last words of the task: acknowledge closers and drain the
    /// command queue so no caller hangs.
    fn finish(&mut self) {
        self.health.mark_task_closed();
        self.commands.close();
        for ack in self.close_acks.drain(..) {
            let _ = ack.send(());
        }
        while let Ok(cmd) = self.commands.try_recv() {
            if let Command::Close(tx) = cmd {
                let _ = tx.send(());
            }
            // Response senders of other commands are dropped; callers
            // observe the engine as closed.
        }
    }
}
