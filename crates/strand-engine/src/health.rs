//! Health reporting and failure notification.
//!
//! The processing task writes a small atomic snapshot (phase, last tick,
//! positions observed at the last tick); `health_status` reads it from
//! any thread without touching the task.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use strand_core::{LogPosition, UNSET_POSITION};

/// Health of one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Replaying the log from the snapshot boundary.
    Reprocessing,
    /// Steady-state processing.
    Processing,
    /// Processing suspended; no new iterations are started.
    Paused,
    /// Terminal until a new instance is created.
    Failed,
    /// Terminal; resources released.
    Closed,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Reprocessing,
            1 => Phase::Processing,
            2 => Phase::Paused,
            3 => Phase::Failed,
            _ => Phase::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Reprocessing => 0,
            Phase::Processing => 1,
            Phase::Paused => 2,
            Phase::Failed => 3,
            Phase::Closed => 4,
        }
    }
}

/// Notified exactly once when the engine transitions to
/// [`Phase::Failed`].
pub trait FailureListener: Send {
    fn on_failure(&self);
}

/// Anything that can report health and notify on failure.
pub trait HealthMonitorable {
    fn health_status(&self) -> HealthStatus;

    fn add_failure_listener(&self, listener: Box<dyn FailureListener>);
}

pub(crate) struct HealthState {
    started: Instant,
    tick_interval_ms: u64,
    phase: AtomicU8,
    task_closed: AtomicBool,
    last_tick_millis: AtomicU64,
    processed: AtomicI64,
    written: AtomicI64,
    observed_processed: AtomicI64,
    observed_written: AtomicI64,
    idle: AtomicBool,
}

impl HealthState {
    pub(crate) fn new(tick_interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            tick_interval_ms: tick_interval.as_millis() as u64,
            phase: AtomicU8::new(Phase::Reprocessing.as_u8()),
            task_closed: AtomicBool::new(false),
            last_tick_millis: AtomicU64::new(0),
            processed: AtomicI64::new(UNSET_POSITION),
            written: AtomicI64::new(UNSET_POSITION),
            observed_processed: AtomicI64::new(UNSET_POSITION),
            observed_written: AtomicI64::new(UNSET_POSITION),
            idle: AtomicBool::new(true),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn mark_task_closed(&self) {
        self.task_closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_positions(&self, processed: LogPosition, written: LogPosition) {
        self.processed.store(processed, Ordering::SeqCst);
        self.written.store(written, Ordering::SeqCst);
    }

    pub(crate) fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }

    /// Record a health tick: snapshot the positions and stamp the time.
    pub(crate) fn record_tick(&self) {
        self.observed_processed
            .store(self.processed.load(Ordering::SeqCst), Ordering::SeqCst);
        self.observed_written
            .store(self.written.load(Ordering::SeqCst), Ordering::SeqCst);
        self.last_tick_millis
            .store(self.now_millis(), Ordering::SeqCst);
    }

    /// Record a tick if one is due. Called from the busy loop so ticks
    /// keep firing while the task never suspends.
    pub(crate) fn maybe_tick(&self) {
        let last = self.last_tick_millis.load(Ordering::SeqCst);
        if self.now_millis().saturating_sub(last) >= self.tick_interval_ms {
            self.record_tick();
        }
    }

    /// Milliseconds until the next tick is due.
    pub(crate) fn tick_remaining(&self) -> Duration {
        let last = self.last_tick_millis.load(Ordering::SeqCst);
        let elapsed = self.now_millis().saturating_sub(last);
        Duration::from_millis(self.tick_interval_ms.saturating_sub(elapsed))
    }

    /// Progress means a position advanced since the last tick, or the
    /// engine has been idle (nothing to read) since then.
    pub(crate) fn is_making_progress(&self) -> bool {
        if self.idle.load(Ordering::SeqCst) {
            return true;
        }
        self.processed.load(Ordering::SeqCst) != self.observed_processed.load(Ordering::SeqCst)
            || self.written.load(Ordering::SeqCst) != self.observed_written.load(Ordering::SeqCst)
    }

    pub(crate) fn status(&self) -> HealthStatus {
        if self.task_closed.load(Ordering::SeqCst) {
            return HealthStatus::Unhealthy;
        }
        if !self.is_making_progress() {
            return HealthStatus::Unhealthy;
        }
        // A missed tick means the task is stuck in a run-until-done loop.
        let last = self.last_tick_millis.load(Ordering::SeqCst);
        if self.now_millis().saturating_sub(last) > 2 * self.tick_interval_ms {
            return HealthStatus::Unhealthy;
        }
        match self.phase() {
            Phase::Paused | Phase::Failed => HealthStatus::Unhealthy,
            _ => HealthStatus::Healthy,
        }
    }

    fn now_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_with_a_tick_is_healthy() {
        let health = HealthState::new(Duration::from_secs(5));
        health.record_tick();
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn idle_counts_as_progress() {
        let health = HealthState::new(Duration::from_secs(5));
        health.record_tick();
        health.set_idle(true);
        assert!(health.is_making_progress());
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn stuck_positions_without_idle_are_unhealthy() {
        let health = HealthState::new(Duration::from_secs(5));
        health.set_positions(10, 12);
        health.record_tick();
        health.set_idle(false);
        assert!(!health.is_making_progress());
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.set_positions(11, 12);
        assert!(health.is_making_progress());
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn paused_and_failed_phases_are_unhealthy() {
        let health = HealthState::new(Duration::from_secs(5));
        health.record_tick();

        health.set_phase(Phase::Paused);
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.set_phase(Phase::Failed);
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.set_phase(Phase::Processing);
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn missed_ticks_trip_the_watchdog() {
        let health = HealthState::new(Duration::from_millis(5));
        health.set_phase(Phase::Processing);
        health.record_tick();
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(health.status(), HealthStatus::Unhealthy);

        health.record_tick();
        assert_eq!(health.status(), HealthStatus::Healthy);
    }

    #[test]
    fn closed_task_is_unhealthy() {
        let health = HealthState::new(Duration::from_secs(5));
        health.record_tick();
        health.mark_task_closed();
        assert_eq!(health.status(), HealthStatus::Unhealthy);
    }
}
