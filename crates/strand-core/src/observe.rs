//! Optional metrics instrumentation for strand.
//!
//! When the `observe` feature is enabled, key operations emit counters
//! and histograms via the [`metrics`] crate. A downstream application
//! must install a metrics recorder (e.g. `metrics-exporter-prometheus`)
//! to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

use crate::types::PartitionId;

/// Record a successful recovery (duration histogram, tagged by partition).
///
/// - `strand.engine.recovery_duration_seconds` – histogram
#[inline]
pub fn record_recovery_time(partition: PartitionId, duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!(
            "strand.engine.recovery_duration_seconds",
            "partition" => partition.to_string()
        )
        .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (partition, duration);
    }
}

/// Record one processed record.
///
/// - `strand.engine.records_processed_total` – counter
#[inline]
pub fn record_processed(partition: PartitionId) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!(
            "strand.engine.records_processed_total",
            "partition" => partition.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = partition;
    }
}

/// Record follow-up records written in one batch.
///
/// - `strand.engine.records_written_total` – counter
#[inline]
pub fn record_written(partition: PartitionId, count: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!(
            "strand.engine.records_written_total",
            "partition" => partition.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (partition, count);
    }
}

/// Record a record skipped because no processor is registered for it.
///
/// - `strand.engine.records_skipped_total` – counter
#[inline]
pub fn record_skipped(partition: PartitionId) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!(
            "strand.engine.records_skipped_total",
            "partition" => partition.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = partition;
    }
}
