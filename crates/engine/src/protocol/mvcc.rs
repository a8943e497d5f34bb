//! Multi-version concurrency control with first-committer-wins.
//!
//! An attempt reads the snapshot at its begin timestamp. At commit it latches
//! its write set in key order, claims every key whose version it read, takes
//! a commit timestamp and installs its writes before letting go. Readers at
//! or after that timestamp queue on the latches, so they see all of the
//! writes or none.

use crate::processor::Shared;
use std::sync::Arc;
use txnflow_concurrency::Transaction;
use txnflow_core::{Conflict, Result, TxnStatus};
use txnflow_storage::Version;

pub(crate) fn attempt(shared: &Shared, mut txn: Transaction) -> Result<()> {
    txn.transition(TxnStatus::Active)?;
    let begin = txn.begin_ts();
    shared.read_snapshot(&mut txn, begin);
    if txn.execute()? != TxnStatus::CompletedCommit {
        return shared.abort_terminal(txn);
    }
    if let Some(key) = shared.unknown_write(&txn) {
        return shared.abort_unknown_key(txn, key);
    }

    let id = txn.id();
    let mut latches: Vec<_> = txn
        .writeset()
        .iter()
        .filter_map(|key| shared.store.latch(*key))
        .collect();

    let mut claimed: Vec<Arc<Version>> = Vec::with_capacity(latches.len());
    let mut conflict = None;
    for latch in &latches {
        let key = latch.key();
        let won = txn
            .reads()
            .get(&key)
            .is_some_and(|read| latch.check_write(&read.version, id));
        if !won {
            conflict = Some(Conflict::WriteIntent { key });
            break;
        }
        if let Some(read) = txn.reads().get(&key) {
            claimed.push(Arc::clone(&read.version));
        }
    }

    if let Some(conflict) = conflict {
        for version in &claimed {
            version.release_intent(id);
        }
        drop(latches);
        txn.transition(TxnStatus::Aborted)?;
        shared.restart(txn, conflict);
        return Ok(());
    }

    let ts = shared.clock.next();
    for latch in &mut latches {
        if let Some(value) = txn.writes().get(&latch.key()) {
            latch.install(*value, ts);
        }
    }
    for version in &claimed {
        version.release_intent(id);
    }
    drop(latches);

    txn.set_end_ts(ts);
    txn.transition(TxnStatus::Committed)?;
    shared.finish(txn);
    Ok(())
}
