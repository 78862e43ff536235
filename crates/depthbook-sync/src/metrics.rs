/*
[INPUT]:  Worker-side sync events (applied, buffered, dropped, gaps, resyncs)
[OUTPUT]: Snapshot-friendly per-subscription counters
[POS]:    Shared runtime metrics between the sync worker and readers
[UPDATE]: When adding/removing sync-level runtime signals
*/

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub events_applied: u64,
    pub events_buffered: u64,
    pub stale_events_dropped: u64,
    pub malformed_messages: u64,
    pub sequence_gaps: u64,
    pub resyncs: u64,
    pub snapshot_failures: u64,
}

/// Counters written by one worker, read from anywhere.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    events_applied: AtomicU64,
    events_buffered: AtomicU64,
    stale_events_dropped: AtomicU64,
    malformed_messages: AtomicU64,
    sequence_gaps: AtomicU64,
    resyncs: AtomicU64,
    snapshot_failures: AtomicU64,
}

impl SyncMetrics {
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_buffered: self.events_buffered.load(Ordering::Relaxed),
            stale_events_dropped: self.stale_events_dropped.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
        }
    }

    pub fn record_applied(&self, count: usize) {
        self.events_applied
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_buffered(&self) {
        self.events_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_dropped(&self) {
        self.stale_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }
}
