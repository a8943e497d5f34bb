//! Logical clock
//!
//! One counter hands out transaction ids and timestamps alike. Allocation is
//! a single atomic increment, so an attempt's id orders it against every
//! commit timestamp issued before or after.

use std::sync::atomic::{AtomicU64, Ordering};
use txnflow_core::Timestamp;

/// Monotonic id/timestamp source owned by the processor.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicU64,
}

impl Clock {
    /// Clock whose first allocation returns 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next timestamp.
    pub fn next(&self) -> Timestamp {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Most recently allocated timestamp.
    pub fn current(&self) -> Timestamp {
        self.last.load(Ordering::Acquire)
    }
}
