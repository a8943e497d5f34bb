//! Two-phase locking with all locks requested up front.
//!
//! Write locks are requested before read locks, in key order. A transaction
//! that blocks on its only key waits in line. One that blocks while needing
//! several keys gives back everything it requested and restarts, so no
//! transaction ever holds locks while waiting and deadlock cannot form.

use super::Protocol;
use crate::pool::WorkerPool;
use crate::processor::{dispatch, Shared};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;
use txnflow_concurrency::{LockManager, Transaction};
use txnflow_core::{Conflict, Key, Result, TxnId, TxnStatus};

enum Acquire {
    Granted,
    Waiting,
    Refused(Key),
}

pub(crate) struct Locking {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    locks: Box<dyn LockManager>,
    blocked: FxHashMap<TxnId, Transaction>,
}

impl Locking {
    pub(crate) fn new(
        shared: Arc<Shared>,
        pool: Arc<WorkerPool>,
        locks: Box<dyn LockManager>,
    ) -> Self {
        Self {
            shared,
            pool,
            locks,
            blocked: FxHashMap::default(),
        }
    }

    fn acquire(&mut self, txn: &Transaction) -> Result<Acquire> {
        let id = txn.id();
        let writes: Vec<Key> = txn.writeset().iter().copied().collect();
        let reads: Vec<Key> = txn.readset().difference(txn.writeset()).copied().collect();
        let total = writes.len() + reads.len();

        let requests = writes
            .iter()
            .map(|key| (*key, true))
            .chain(reads.iter().map(|key| (*key, false)));
        let mut requested = Vec::with_capacity(total);
        for (key, exclusive) in requests {
            let granted = if exclusive {
                self.locks.write_lock(id, key)
            } else {
                self.locks.read_lock(id, key)
            };
            requested.push(key);
            if granted {
                continue;
            }
            if total == 1 {
                return Ok(Acquire::Waiting);
            }
            for held in requested {
                let ready = self.locks.release(id, held);
                self.wake(ready)?;
            }
            self.locks.forget(id);
            return Ok(Acquire::Refused(key));
        }
        Ok(Acquire::Granted)
    }

    /// Dispatch transactions whose last awaited lock was just granted.
    fn wake(&mut self, ready: Vec<TxnId>) -> Result<()> {
        for id in ready {
            if let Some(txn) = self.blocked.remove(&id) {
                trace!(target: "txnflow::lock", txn = id, "All locks granted");
                self.run(txn)?;
            }
        }
        Ok(())
    }

    fn run(&self, txn: Transaction) -> Result<()> {
        dispatch(&self.shared, &self.pool, txn, execute_locked)
    }
}

/// Worker half: read, run the body, hand back to the scheduler.
fn execute_locked(shared: &Shared, mut txn: Transaction) -> Result<()> {
    shared.read_latest(&mut txn);
    txn.execute()?;
    shared.completed.push(txn);
    Ok(())
}

impl Protocol for Locking {
    fn admit(&mut self, mut txn: Transaction) -> Result<()> {
        txn.transition(TxnStatus::Active)?;
        match self.acquire(&txn)? {
            Acquire::Granted => self.run(txn),
            Acquire::Waiting => {
                trace!(target: "txnflow::lock", txn = txn.id(), "Waiting for lock");
                self.blocked.insert(txn.id(), txn);
                Ok(())
            }
            Acquire::Refused(key) => {
                txn.transition(TxnStatus::Aborted)?;
                self.shared.restart(txn, Conflict::LockUnavailable { key });
                Ok(())
            }
        }
    }

    fn complete(&mut self, txn: Transaction) -> Result<()> {
        let id = txn.id();
        let keys = txn.keys();
        self.shared.finish_single_version(txn)?;
        for key in keys {
            let ready = self.locks.release(id, key);
            self.wake(ready)?;
        }
        Ok(())
    }
}
