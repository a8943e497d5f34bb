//! Snapshot isolation and constrained snapshot isolation.
//!
//! An attempt claims the write intent of every key it declared before running
//! its body, so write-write conflicts are found before any work is done. The
//! body's writes become speculative versions whose boundaries point at the
//! attempt's record in the transaction table until the outcome is decided.
//!
//! Under the constrained variant the body re-checks its invariant against the
//! state as of its own commit timestamp. A failed check turns the commit into
//! an abort and the attempt is retried.

use crate::processor::Shared;
use std::sync::Arc;
use tracing::trace;
use txnflow_concurrency::{ConstraintView, Transaction};
use txnflow_core::{CcMode, Conflict, Key, Result, TxnId, TxnStatus};
use txnflow_storage::{TxnRecord, Version};

/// Versions an attempt holds the write intent of.
struct Claims {
    txn: TxnId,
    held: Vec<(Key, Arc<Version>)>,
}

impl Claims {
    fn get(&self, key: Key) -> Option<&Arc<Version>> {
        self.held.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    fn release(&self) {
        for (_, version) in &self.held {
            version.release_intent(self.txn);
        }
    }
}

pub(crate) fn attempt(shared: &Shared, mut txn: Transaction) -> Result<()> {
    let constrained = shared.mode == CcMode::ConstrainedSnapshotIsolation;
    txn.transition(TxnStatus::Active)?;
    let id = txn.id();
    let record = shared.txns().register(id, TxnStatus::Active);

    let begin = txn.begin_ts();
    shared.read_snapshot(&mut txn, begin);

    let mut claims = Claims {
        txn: id,
        held: Vec::new(),
    };
    let write_keys: Vec<Key> = txn.writeset().iter().copied().collect();
    for key in write_keys {
        let Some(version) = txn.reads().get(&key).map(|read| Arc::clone(&read.version)) else {
            continue;
        };
        if !shared.store.check_write(key, &version, id) {
            claims.release();
            retire(shared, &record);
            txn.transition(TxnStatus::Aborted)?;
            shared.restart(txn, Conflict::WriteIntent { key });
            return Ok(());
        }
        claims.held.push((key, version));
    }

    if txn.execute()? != TxnStatus::CompletedCommit {
        claims.release();
        retire(shared, &record);
        return shared.abort_terminal(txn);
    }
    if let Some(key) = shared.unknown_write(&txn) {
        claims.release();
        retire(shared, &record);
        return shared.abort_unknown_key(txn, key);
    }

    let mut written: Vec<(Key, Arc<Version>, Arc<Version>)> = Vec::new();
    for (key, value) in txn.writes() {
        let Some(old) = claims.get(*key).cloned() else {
            continue;
        };
        let new = shared.store.finish_write(*key, *value, id)?;
        written.push((*key, old, new));
    }

    // Readers that start after the commit timestamp must already see the
    // record as deciding.
    record.set_status(TxnStatus::CompletedCommit);
    let end = shared.clock.next();
    record.set_end_ts(end);
    txn.set_end_ts(end);

    if constrained {
        let view: ConstraintView = txn
            .constraint_set()
            .into_iter()
            .filter_map(|key| shared.store.read(key, end, id).map(|read| (key, read.value())))
            .collect();
        if !txn.validate_constraints(&view) {
            record.set_status(TxnStatus::Aborted);
            for (key, _, _) in &written {
                shared.store.abandon_write(*key, id);
            }
            claims.release();
            shared.txns().remove(id);
            trace!(target: "txnflow::sched", txn = id, end, "Constraint check failed");
            txn.transition(TxnStatus::Aborted)?;
            shared.restart(txn, Conflict::ConstraintViolated);
            return Ok(());
        }
    }

    record.set_status(TxnStatus::Committed);
    for (key, old, new) in &written {
        shared.store.close_version(*key, old, new, end);
    }
    claims.release();
    shared.txns().remove(id);

    txn.transition(TxnStatus::Committed)?;
    shared.finish(txn);
    Ok(())
}

/// Mark the attempt's record aborted and drop it.
fn retire(shared: &Shared, record: &TxnRecord) {
    record.set_status(TxnStatus::Aborted);
    shared.txns().remove(record.id());
}
