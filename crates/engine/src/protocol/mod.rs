//! Concurrency-control protocols
//!
//! The scheduler thread owns one [`Protocol`] and feeds it new requests and
//! attempts that workers handed back. Modes that decide commits on workers
//! ([`CcMode::ParallelOcc`] and the multi-version modes) only dispatch.

mod locking;
mod mvcc;
mod occ;
mod serial;
mod snapshot;

use crate::pool::WorkerPool;
use crate::processor::{dispatch, Shared};
use std::sync::Arc;
use tracing::warn;
use txnflow_concurrency::{ExclusiveLockManager, SharedLockManager, Transaction};
use txnflow_core::{CcMode, Result};

/// Scheduler-side half of a concurrency mode.
pub(crate) trait Protocol {
    /// Take a newly submitted or restarted transaction.
    fn admit(&mut self, txn: Transaction) -> Result<()>;

    /// Take an attempt whose body ran on a worker.
    fn complete(&mut self, txn: Transaction) -> Result<()> {
        warn!(
            target: "txnflow::sched",
            txn = txn.id(),
            "Completed attempt handed to a protocol that finishes on workers"
        );
        Ok(())
    }
}

pub(crate) fn for_mode(shared: Arc<Shared>, pool: Arc<WorkerPool>) -> Box<dyn Protocol> {
    let mode = shared.mode;
    match mode {
        CcMode::Serial => Box::new(serial::Serial::new(shared)),
        CcMode::ExclusiveLocking => Box::new(locking::Locking::new(
            shared,
            pool,
            Box::new(ExclusiveLockManager::new()),
        )),
        CcMode::SharedLocking => Box::new(locking::Locking::new(
            shared,
            pool,
            Box::new(SharedLockManager::new()),
        )),
        CcMode::Occ => Box::new(occ::Occ::new(shared, pool)),
        CcMode::ParallelOcc => Box::new(OnWorker::new(shared, pool, occ::parallel_attempt)),
        CcMode::Mvcc => Box::new(OnWorker::new(shared, pool, mvcc::attempt)),
        CcMode::SnapshotIsolation | CcMode::ConstrainedSnapshotIsolation => {
            Box::new(OnWorker::new(shared, pool, snapshot::attempt))
        }
    }
}

/// Hands each request to a worker that runs the whole attempt.
struct OnWorker {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    attempt: fn(&Shared, Transaction) -> Result<()>,
}

impl OnWorker {
    fn new(
        shared: Arc<Shared>,
        pool: Arc<WorkerPool>,
        attempt: fn(&Shared, Transaction) -> Result<()>,
    ) -> Self {
        Self {
            shared,
            pool,
            attempt,
        }
    }
}

impl Protocol for OnWorker {
    fn admit(&mut self, txn: Transaction) -> Result<()> {
        dispatch(&self.shared, &self.pool, txn, self.attempt)
    }
}
