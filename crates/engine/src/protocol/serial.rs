//! One transaction at a time, run on the scheduler thread.

use super::Protocol;
use crate::processor::Shared;
use std::sync::Arc;
use txnflow_concurrency::Transaction;
use txnflow_core::{Result, TxnStatus};

pub(crate) struct Serial {
    shared: Arc<Shared>,
}

impl Serial {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl Protocol for Serial {
    fn admit(&mut self, mut txn: Transaction) -> Result<()> {
        txn.transition(TxnStatus::Active)?;
        self.shared.read_latest(&mut txn);
        txn.execute()?;
        self.shared.finish_single_version(txn)
    }
}
