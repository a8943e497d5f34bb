//! Optimistic concurrency control
//!
//! Reads and body execution run on workers against the newest committed
//! values. Validation compares the versions each attempt saw against the
//! versions now current. [`Occ`] validates one attempt at a time on the
//! scheduler; [`parallel_attempt`] validates on the worker, also checking the
//! attempts validating alongside it.

use super::Protocol;
use crate::pool::WorkerPool;
use crate::processor::{dispatch, Shared};
use std::sync::Arc;
use txnflow_concurrency::{
    validate_against_active, validate_read_versions, Footprint, Transaction, ValidationResult,
};
use txnflow_core::{Conflict, Result, TxnStatus};

pub(crate) struct Occ {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
}

impl Occ {
    pub(crate) fn new(shared: Arc<Shared>, pool: Arc<WorkerPool>) -> Self {
        Self { shared, pool }
    }
}

fn read_and_execute(shared: &Shared, mut txn: Transaction) -> Result<()> {
    txn.set_start_ts(shared.clock.current());
    shared.read_latest(&mut txn);
    txn.execute()?;
    shared.completed.push(txn);
    Ok(())
}

impl Protocol for Occ {
    fn admit(&mut self, mut txn: Transaction) -> Result<()> {
        txn.transition(TxnStatus::Active)?;
        dispatch(&self.shared, &self.pool, txn, read_and_execute)
    }

    fn complete(&mut self, txn: Transaction) -> Result<()> {
        if txn.status() != TxnStatus::CompletedCommit {
            return self.shared.abort_terminal(txn);
        }
        let result = validate_read_versions(&txn, &self.shared.store);
        if result.is_valid() {
            self.shared.finish_single_version(txn)
        } else {
            reject(&self.shared, txn, result)
        }
    }
}

fn reject(shared: &Shared, mut txn: Transaction, result: ValidationResult) -> Result<()> {
    txn.transition(TxnStatus::Aborted)?;
    let conflict = result
        .conflicts
        .into_iter()
        .next()
        .unwrap_or(Conflict::ConstraintViolated);
    shared.restart(txn, conflict);
    Ok(())
}

/// Whole attempt on a worker, validating concurrently with other workers.
pub(crate) fn parallel_attempt(shared: &Shared, mut txn: Transaction) -> Result<()> {
    txn.transition(TxnStatus::Active)?;
    txn.set_start_ts(shared.clock.current());
    shared.read_latest(&mut txn);
    if txn.execute()? != TxnStatus::CompletedCommit {
        return shared.abort_terminal(txn);
    }
    if let Some(key) = shared.unknown_write(&txn) {
        return shared.abort_unknown_key(txn, key);
    }

    let id = txn.id();
    let footprint = Footprint::of(&txn);
    let others = shared.active.enter(id, footprint.clone());
    let mut result = validate_read_versions(&txn, &shared.store);
    result.merge(validate_against_active(&footprint, &others));

    if !result.is_valid() {
        shared.active.leave(id);
        return reject(shared, txn, result);
    }
    let applied = shared.apply_writes(&mut txn);
    shared.active.leave(id);
    applied?;
    txn.transition(TxnStatus::Committed)?;
    shared.finish(txn);
    Ok(())
}
