//! Processor metrics
//!
//! Counters use Relaxed ordering: they are observational only and never
//! synchronize other memory.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of processor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Transactions accepted by `submit`
    pub submitted: u64,
    /// Transactions returned as committed
    pub committed: u64,
    /// Transactions returned as aborted
    pub aborted: u64,
    /// Attempts restarted after a concurrency conflict
    pub restarts: u64,
}

impl ProcessorStats {
    /// Submitted transactions whose result has not been produced yet.
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.committed)
            .saturating_sub(self.aborted)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProcessorMetrics {
    submitted: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    restarts: AtomicU64,
}

impl ProcessorMetrics {
    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProcessorStats {
        ProcessorStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}
