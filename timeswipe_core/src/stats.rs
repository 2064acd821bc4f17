//! Lifetime counters of the stream, updated lock-free from the worker threads.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub ticks: AtomicU64,
    pub rows_delivered: AtomicU64,
    pub batches_delivered: AtomicU64,
    pub discarded_ticks: AtomicU64,
    pub faults: AtomicU64,
    pub incomplete_ticks: AtomicU64,
    pub dropped_batches: AtomicU64,
    pub dropped_events: AtomicU64,
    pub late_ticks: AtomicU64,
}

#[inline]
pub(crate) fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time copy of the stream counters. Counters never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Ticks executed by the sampler.
    pub ticks: u64,
    /// Rows handed to the data consumer.
    pub rows_delivered: u64,
    pub batches_delivered: u64,
    /// Ticks skipped by the startup or settling guard.
    pub discarded_ticks: u64,
    /// Ticks lost to hardware faults.
    pub faults: u64,
    /// Ticks skipped because calibration was incomplete.
    pub incomplete_ticks: u64,
    /// Batches evicted because the data consumer fell behind.
    pub dropped_batches: u64,
    /// Button transitions evicted because the event consumer fell behind.
    pub dropped_events: u64,
    /// Ticks that started more than one period late.
    pub late_ticks: u64,
}

impl Stats {
    pub(crate) fn snapshot(&self) -> StreamStats {
        let ld = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamStats {
            ticks: ld(&self.ticks),
            rows_delivered: ld(&self.rows_delivered),
            batches_delivered: ld(&self.batches_delivered),
            discarded_ticks: ld(&self.discarded_ticks),
            faults: ld(&self.faults),
            incomplete_ticks: ld(&self.incomplete_ticks),
            dropped_batches: ld(&self.dropped_batches),
            dropped_events: ld(&self.dropped_events),
            late_ticks: ld(&self.late_ticks),
        }
    }
}
