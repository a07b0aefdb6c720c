//! Append backpressure metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tidelog_concurrency::Limiter;
use tidelog_core::PartitionId;

/// Live counters of one partition's appender
#[derive(Debug)]
pub struct AppendMetrics {
    partition_id: PartitionId,
    entries_to_append: AtomicU64,
    deferred_appends: AtomicU64,
    committed_appends: AtomicU64,
    failed_appends: AtomicU64,
    inflight: AtomicUsize,
    limit: AtomicUsize,
    last_commit_latency_nanos: AtomicU64,
}

impl AppendMetrics {
    /// Zeroed metrics for `partition_id`
    pub fn new(partition_id: PartitionId) -> Self {
        AppendMetrics {
            partition_id,
            entries_to_append: AtomicU64::new(0),
            deferred_appends: AtomicU64::new(0),
            committed_appends: AtomicU64::new(0),
            failed_appends: AtomicU64::new(0),
            inflight: AtomicUsize::new(0),
            limit: AtomicUsize::new(0),
            last_commit_latency_nanos: AtomicU64::new(0),
        }
    }

    pub(crate) fn new_entry_to_append(&self) {
        self.entries_to_append.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn deferred(&self) {
        self.deferred_appends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn committed(&self, latency_nanos: u64) {
        self.committed_appends.fetch_add(1, Ordering::Relaxed);
        self.last_commit_latency_nanos
            .store(latency_nanos, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed_appends.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh the in-flight and limit gauges
    pub(crate) fn observe(&self, limiter: &dyn Limiter) {
        self.inflight.store(limiter.inflight(), Ordering::Relaxed);
        self.limit.store(limiter.limit(), Ordering::Relaxed);
    }

    /// Point-in-time copy of the metrics
    pub fn snapshot(&self) -> AppendMetricsSnapshot {
        AppendMetricsSnapshot {
            partition_id: self.partition_id,
            entries_to_append: self.entries_to_append.load(Ordering::Relaxed),
            deferred_appends: self.deferred_appends.load(Ordering::Relaxed),
            committed_appends: self.committed_appends.load(Ordering::Relaxed),
            failed_appends: self.failed_appends.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            limit: self.limit.load(Ordering::Relaxed),
            last_commit_latency_nanos: self.last_commit_latency_nanos.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`AppendMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendMetricsSnapshot {
    /// Partition the appender serves
    pub partition_id: PartitionId,
    /// Blocks the appender tried to append, including deferred attempts
    pub entries_to_append: u64,
    /// Attempts rejected by the limiter
    pub deferred_appends: u64,
    /// Entries committed by storage
    pub committed_appends: u64,
    /// Entries that failed to write or commit
    pub failed_appends: u64,
    /// In-flight appends at the last observation
    pub inflight: usize,
    /// Limit at the last observation
    pub limit: usize,
    /// Time from append to commit of the most recent commit
    pub last_commit_latency_nanos: u64,
}

impl AppendMetricsSnapshot {
    /// Attempts that were admitted
    pub fn admitted_appends(&self) -> u64 {
        self.entries_to_append - self.deferred_appends
    }

    /// Share of attempts that were deferred
    pub fn deferral_rate(&self) -> f64 {
        if self.entries_to_append > 0 {
            self.deferred_appends as f64 / self.entries_to_append as f64
        } else {
            0.0
        }
    }
}
