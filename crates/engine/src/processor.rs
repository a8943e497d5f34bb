//! Transaction processor
//!
//! Clients hand transactions to [`TxnProcessor::submit`] and collect finished
//! ones with [`TxnProcessor::await_result`]. A scheduler thread drains the
//! request queue and the completed-attempt queue and drives a fixed worker
//! pool according to the configured [`CcMode`].
//!
//! Concurrency conflicts never reach the client: the attempt is rebuilt from
//! its body's definition and resubmitted under a fresh id until it commits or
//! the body itself aborts.

use crate::clock::Clock;
use crate::pool::{panic_message, WorkerPool};
use crate::protocol;
use crate::queue::TxnQueue;
use crate::stats::{ProcessorMetrics, ProcessorStats};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use txnflow_concurrency::{ActiveSet, Transaction};
use txnflow_core::{
    CcMode, Conflict, EngineConfig, Error, Key, Result, Timestamp, TxnId, TxnStatus, Value,
};
use txnflow_storage::{TxnTable, VersionStore};

/// Longest single wait of a result consumer before it re-checks for
/// shutdown or a worker panic.
const RESULT_POLL: Duration = Duration::from_millis(10);

/// State shared by the scheduler thread, the workers and the client handle.
pub(crate) struct Shared {
    pub(crate) mode: CcMode,
    pub(crate) poll_interval: Duration,
    pub(crate) store: VersionStore,
    pub(crate) clock: Clock,
    pub(crate) requests: TxnQueue<Transaction>,
    pub(crate) completed: TxnQueue<Transaction>,
    pub(crate) active: ActiveSet,
    results: TxnQueue<Transaction>,
    metrics: ProcessorMetrics,
    running: AtomicBool,
    panic: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn txns(&self) -> &TxnTable {
        self.store.txn_table()
    }

    /// Deliver a committed or aborted transaction to the client.
    pub(crate) fn finish(&self, txn: Transaction) {
        if txn.status() == TxnStatus::Committed {
            self.metrics.record_commit();
        } else {
            self.metrics.record_abort();
        }
        debug!(
            target: "txnflow::sched",
            txn = txn.id(),
            name = txn.name(),
            status = %txn.status(),
            restarts = txn.restarts(),
            "Transaction finished"
        );
        self.results.push(txn);
    }

    /// Resubmit a transaction whose attempt lost a concurrency conflict.
    pub(crate) fn restart(&self, txn: Transaction, conflict: Conflict) {
        let old = txn.id();
        let mut next = txn.retry();
        let id = self.clock.next();
        next.assign_id(id);
        self.metrics.record_restart();
        debug!(target: "txnflow::sched", old, new = id, %conflict, "Restarting after conflict");
        self.requests.push(next);
    }

    /// Terminal abort decided by the body.
    pub(crate) fn abort_terminal(&self, mut txn: Transaction) -> Result<()> {
        txn.transition(TxnStatus::Aborted)?;
        self.finish(txn);
        Ok(())
    }

    /// Terminal abort of a transaction writing outside the key space. Retrying
    /// could never succeed.
    pub(crate) fn abort_unknown_key(&self, txn: Transaction, key: Key) -> Result<()> {
        warn!(target: "txnflow::sched", txn = txn.id(), key, "Write outside key space, aborting");
        self.abort_terminal(txn)
    }

    /// First buffered write outside the key space.
    pub(crate) fn unknown_write(&self, txn: &Transaction) -> Option<Key> {
        txn.writes().keys().copied().find(|key| !self.store.contains(*key))
    }

    /// Read phase of single-version modes.
    pub(crate) fn read_latest(&self, txn: &mut Transaction) {
        for key in txn.keys() {
            if let Some(read) = self.store.read_latest(key) {
                txn.record_read(key, read);
            }
        }
    }

    /// Read phase of multi-version modes.
    pub(crate) fn read_snapshot(&self, txn: &mut Transaction, as_of: Timestamp) {
        let reader = txn.id();
        for key in txn.keys() {
            if let Some(read) = self.store.read(key, as_of, reader) {
                txn.record_read(key, read);
            }
        }
    }

    /// Commit or abort a single-version attempt after its body ran.
    pub(crate) fn finish_single_version(&self, mut txn: Transaction) -> Result<()> {
        if txn.status() != TxnStatus::CompletedCommit {
            return self.abort_terminal(txn);
        }
        if let Some(key) = self.unknown_write(&txn) {
            return self.abort_unknown_key(txn, key);
        }
        self.apply_writes(&mut txn)?;
        txn.transition(TxnStatus::Committed)?;
        self.finish(txn);
        Ok(())
    }

    /// Install buffered writes as committed versions at a fresh timestamp.
    pub(crate) fn apply_writes(&self, txn: &mut Transaction) -> Result<Timestamp> {
        let ts = self.clock.next();
        for (key, value) in txn.writes() {
            self.store.install(*key, *value, ts)?;
        }
        txn.set_end_ts(ts);
        Ok(ts)
    }

    /// Record a fatal failure. Every later `await_result` reports it.
    pub(crate) fn poison(&self, message: String) {
        {
            let mut slot = self.panic.lock();
            if slot.is_none() {
                *slot = Some(message);
            }
        }
        self.results.notify_all();
    }

    fn poisoned(&self) -> Option<String> {
        self.panic.lock().clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Concurrency-controlled transaction processor.
///
/// # Example
///
/// ```ignore
/// use txnflow_engine::{bodies::Put, TxnProcessor};
/// use txnflow_concurrency::Transaction;
/// use txnflow_core::{CcMode, EngineConfig};
///
/// let processor = TxnProcessor::new(EngineConfig::for_mode(CcMode::Mvcc))?;
/// processor.submit(Transaction::new(Put::new([(1, 2)])))?;
/// let done = processor.await_result()?;
/// ```
pub struct TxnProcessor {
    shared: Arc<Shared>,
    pool: Arc<WorkerPool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl TxnProcessor {
    /// Validate `config`, populate the key space and start the scheduler and
    /// worker threads.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut store = VersionStore::new(Arc::new(TxnTable::new()));
        store.init_storage(config.key_space, config.initial_value);

        let shared = Arc::new(Shared {
            mode: config.mode,
            poll_interval: config.poll_interval(),
            store,
            clock: Clock::new(),
            requests: TxnQueue::new(),
            completed: TxnQueue::new(),
            active: ActiveSet::new(),
            results: TxnQueue::new(),
            metrics: ProcessorMetrics::default(),
            running: AtomicBool::new(true),
            panic: Mutex::new(None),
        });

        let hook = Arc::clone(&shared);
        let pool = Arc::new(WorkerPool::new(config.worker_threads, move |message| {
            hook.poison(message)
        })?);

        let scheduler = {
            let shared = Arc::clone(&shared);
            let pool = Arc::clone(&pool);
            std::thread::Builder::new()
                .name("txnflow-scheduler".to_string())
                .spawn(move || scheduler_loop(shared, pool))?
        };

        info!(
            target: "txnflow::sched",
            mode = %config.mode,
            workers = config.worker_threads,
            key_space = config.key_space,
            "Transaction processor started"
        );

        Ok(Self {
            shared,
            pool,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Configured concurrency mode.
    pub fn mode(&self) -> CcMode {
        self.shared.mode
    }

    /// Hand a transaction to the processor. Returns the id of its first
    /// attempt.
    pub fn submit(&self, mut txn: Transaction) -> Result<TxnId> {
        if !self.shared.is_running() {
            return Err(Error::ShutDown);
        }
        if txn.status() != TxnStatus::Incomplete {
            return Err(Error::InvalidTransition {
                id: txn.id(),
                from: txn.status(),
                to: TxnStatus::Active,
            });
        }
        let id = self.shared.clock.next();
        txn.assign_id(id);
        self.shared.metrics.record_submit();
        self.shared.requests.push(txn);
        Ok(id)
    }

    /// Block until some submitted transaction finishes. Results arrive in
    /// completion order.
    pub fn await_result(&self) -> Result<Transaction> {
        loop {
            if let Some(txn) = self.poll_result(RESULT_POLL)? {
                return Ok(txn);
            }
        }
    }

    /// Like [`TxnProcessor::await_result`], giving up after `timeout`.
    pub fn await_result_timeout(&self, timeout: Duration) -> Result<Option<Transaction>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some(txn) = self.poll_result(remaining.min(RESULT_POLL))? {
                return Ok(Some(txn));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn poll_result(&self, wait: Duration) -> Result<Option<Transaction>> {
        if let Some(message) = self.shared.poisoned() {
            return Err(Error::WorkerPanicked(message));
        }
        if let Some(txn) = self.shared.results.pop_timeout(wait) {
            return Ok(Some(txn));
        }
        if !self.shared.is_running() {
            return self.shared.results.try_pop().map(Some).ok_or(Error::ShutDown);
        }
        Ok(None)
    }

    /// Newest committed value of `key`.
    pub fn latest_value(&self, key: Key) -> Option<Value> {
        self.shared.store.read_latest(key).map(|read| read.value())
    }

    /// The underlying version store.
    pub fn store(&self) -> &VersionStore {
        &self.shared.store
    }

    /// Snapshot of processor counters.
    pub fn stats(&self) -> ProcessorStats {
        self.shared.metrics.snapshot()
    }

    /// Stop the scheduler and join every thread. Transactions still queued
    /// are dropped. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.requests.notify_all();
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.join();
        }
        self.pool.shutdown();
        self.shared.results.notify_all();
        info!(target: "txnflow::sched", stats = ?self.stats(), "Transaction processor stopped");
    }
}

impl Drop for TxnProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn scheduler_loop(shared: Arc<Shared>, pool: Arc<WorkerPool>) {
    let mut protocol = protocol::for_mode(Arc::clone(&shared), pool);
    while shared.is_running() {
        let step = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            while let Some(txn) = shared.completed.try_pop() {
                protocol.complete(txn)?;
            }
            if let Some(txn) = shared.requests.pop_timeout(shared.poll_interval) {
                protocol.admit(txn)?;
            }
            Ok(())
        }));
        match step {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(target: "txnflow::sched", error = %e, "Scheduler step failed");
                shared.poison(e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(target: "txnflow::sched", message = %message, "Scheduler step panicked");
                shared.poison(message);
            }
        }
    }
}

/// Run `work` for `txn` on the pool, poisoning the processor if it fails.
pub(crate) fn dispatch(
    shared: &Arc<Shared>,
    pool: &WorkerPool,
    txn: Transaction,
    work: fn(&Shared, Transaction) -> Result<()>,
) -> Result<()> {
    let shared = Arc::clone(shared);
    pool.submit(move || {
        if let Err(e) = work(&shared, txn) {
            error!(target: "txnflow::sched", error = %e, "Attempt failed");
            shared.poison(e.to_string());
        }
    })
}
