//! Transaction descriptor and the body contract
//!
//! A [`Transaction`] owns its declared read/write sets, the values buffered
//! by its read phase, and the writes its body produced. The processor moves
//! it between threads; only the thread currently holding it touches it.
//!
//! Application logic lives behind [`TxnBody`]. A body may only read keys in
//! its read or write set and only write keys in its write set; anything else
//! is a programming error and panics.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use txnflow_core::{Error, Key, Result, Timestamp, TxnId, TxnStatus, Value, NO_TXN};
use txnflow_storage::ReadVersion;

// ============================================================================
// Body contract
// ============================================================================

/// Application logic of a transaction.
pub trait TxnBody: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Keys the body reads.
    fn readset(&self) -> BTreeSet<Key>;

    /// Keys the body may write.
    fn writeset(&self) -> BTreeSet<Key>;

    /// Execute against buffered reads. Call [`TxnContext::abort`] to give up.
    fn run(&mut self, ctx: &mut TxnContext<'_>);

    /// Commit-time invariant check against values re-read at the commit
    /// timestamp. Only consulted by constrained snapshot isolation.
    fn validate(&self, _view: &ConstraintView) -> bool {
        true
    }

    /// Keys re-read for [`TxnBody::validate`].
    fn constraint_set(&self) -> BTreeSet<Key> {
        let mut keys = self.readset();
        keys.extend(self.writeset());
        keys
    }

    /// Fresh copy of this body's definition, without any state recorded by a
    /// previous run.
    fn fork(&self) -> Box<dyn TxnBody>;
}

/// What a body sees while it runs.
pub struct TxnContext<'a> {
    id: TxnId,
    readset: &'a BTreeSet<Key>,
    writeset: &'a BTreeSet<Key>,
    reads: &'a BTreeMap<Key, ReadVersion>,
    writes: &'a mut BTreeMap<Key, Value>,
    aborted: bool,
}

impl TxnContext<'_> {
    /// Id of the running attempt.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Value of `key`: the body's own pending write if any, otherwise the
    /// buffered read. `None` when the key does not exist.
    ///
    /// # Panics
    ///
    /// If `key` is in neither the read nor the write set.
    pub fn read(&self, key: Key) -> Option<Value> {
        assert!(
            self.readset.contains(&key) || self.writeset.contains(&key),
            "transaction {} read undeclared key {}",
            self.id,
            key
        );
        self.writes
            .get(&key)
            .copied()
            .or_else(|| self.reads.get(&key).map(ReadVersion::value))
    }

    /// Buffer a write.
    ///
    /// # Panics
    ///
    /// If `key` is not in the write set.
    pub fn write(&mut self, key: Key, value: Value) {
        assert!(
            self.writeset.contains(&key),
            "transaction {} wrote undeclared key {}",
            self.id,
            key
        );
        self.writes.insert(key, value);
    }

    /// Decide to abort. The decision is final and never retried.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Whether [`TxnContext::abort`] was called.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

/// Values re-read at the commit timestamp for [`TxnBody::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintView {
    values: BTreeMap<Key, Value>,
}

impl ConstraintView {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the value of `key`.
    pub fn insert(&mut self, key: Key, value: Value) {
        self.values.insert(key, value);
    }

    /// Value of `key`, `None` when it was not visible.
    pub fn get(&self, key: Key) -> Option<Value> {
        self.values.get(&key).copied()
    }

    /// Number of keys in the view.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(Key, Value)> for ConstraintView {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Descriptor
// ============================================================================

/// One transaction attempt.
pub struct Transaction {
    id: TxnId,
    start_ts: Timestamp,
    end_ts: Option<Timestamp>,
    status: TxnStatus,
    readset: BTreeSet<Key>,
    writeset: BTreeSet<Key>,
    reads: BTreeMap<Key, ReadVersion>,
    writes: BTreeMap<Key, Value>,
    body: Box<dyn TxnBody>,
    restarts: u32,
}

impl Transaction {
    /// Wrap a body. The id is assigned on submission.
    pub fn new(body: impl TxnBody + 'static) -> Self {
        Self::from_boxed(Box::new(body))
    }

    /// Wrap an already boxed body.
    pub fn from_boxed(body: Box<dyn TxnBody>) -> Self {
        Self {
            id: NO_TXN,
            start_ts: 0,
            end_ts: None,
            status: TxnStatus::Incomplete,
            readset: body.readset(),
            writeset: body.writeset(),
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            body,
            restarts: 0,
        }
    }

    /// Attempt id. Also the begin timestamp of the attempt.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Begin timestamp (read visibility).
    pub fn begin_ts(&self) -> Timestamp {
        self.id
    }

    /// Commit timestamp, once assigned.
    pub fn end_ts(&self) -> Option<Timestamp> {
        self.end_ts
    }

    /// Clock reading taken when an optimistic read phase started.
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Current status.
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Body name.
    pub fn name(&self) -> &'static str {
        self.body.name()
    }

    /// Declared read set.
    pub fn readset(&self) -> &BTreeSet<Key> {
        &self.readset
    }

    /// Declared write set.
    pub fn writeset(&self) -> &BTreeSet<Key> {
        &self.writeset
    }

    /// Read set and write set together, ascending.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.readset.union(&self.writeset).copied().collect()
    }

    /// Versions seen by the read phase.
    pub fn reads(&self) -> &BTreeMap<Key, ReadVersion> {
        &self.reads
    }

    /// Buffered writes.
    pub fn writes(&self) -> &BTreeMap<Key, Value> {
        &self.writes
    }

    /// Value the read phase saw for `key`.
    pub fn read_value(&self, key: Key) -> Option<Value> {
        self.reads.get(&key).map(ReadVersion::value)
    }

    /// How many times this transaction was restarted after a conflict.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Keys of the commit-time constraint set.
    pub fn constraint_set(&self) -> BTreeSet<Key> {
        self.body.constraint_set()
    }

    /// Assign the attempt id. Only legal before admission.
    pub fn assign_id(&mut self, id: TxnId) {
        debug_assert_eq!(self.status, TxnStatus::Incomplete);
        self.id = id;
    }

    /// Record the optimistic start snapshot.
    pub fn set_start_ts(&mut self, ts: Timestamp) {
        self.start_ts = ts;
    }

    /// Record the commit timestamp.
    pub fn set_end_ts(&mut self, ts: Timestamp) {
        self.end_ts = Some(ts);
    }

    /// Buffer the version the read phase saw for `key`.
    pub fn record_read(&mut self, key: Key, read: ReadVersion) {
        self.reads.insert(key, read);
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: TxnStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Run the body against the buffered reads.
    ///
    /// Moves `Active` to `CompletedCommit` or `CompletedAbort` and returns the
    /// new status.
    pub fn execute(&mut self) -> Result<TxnStatus> {
        if self.status != TxnStatus::Active {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: self.status,
                to: TxnStatus::CompletedCommit,
            });
        }
        let mut ctx = TxnContext {
            id: self.id,
            readset: &self.readset,
            writeset: &self.writeset,
            reads: &self.reads,
            writes: &mut self.writes,
            aborted: false,
        };
        self.body.run(&mut ctx);
        let next = if ctx.aborted {
            TxnStatus::CompletedAbort
        } else {
            TxnStatus::CompletedCommit
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Run the body's commit-time invariant check.
    pub fn validate_constraints(&self, view: &ConstraintView) -> bool {
        self.body.validate(view)
    }

    /// New attempt built from the body's definition. Buffers, timestamps and
    /// status start over; the id is assigned on resubmission.
    pub fn retry(self) -> Transaction {
        let mut next = Transaction::from_boxed(self.body.fork());
        next.restarts = self.restarts + 1;
        next
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("status", &self.status)
            .field("readset", &self.readset)
            .field("writeset", &self.writeset)
            .field("writes", &self.writes)
            .field("restarts", &self.restarts)
            .finish()
    }
}
