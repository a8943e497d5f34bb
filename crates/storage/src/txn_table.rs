//! Transaction table
//!
//! Speculative version boundaries name their owning transaction by id. Readers
//! resolve such a boundary by looking the owner up here, so a version never
//! points at a transaction object that may already be gone. A missing record
//! reads as "no live owner".

use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use txnflow_core::{Timestamp, TxnId, TxnStatus};

/// Shared view of one in-flight transaction attempt.
#[derive(Debug)]
pub struct TxnRecord {
    id: TxnId,
    status: AtomicU8,
    /// 0 until the commit timestamp is assigned
    end_ts: AtomicU64,
}

impl TxnRecord {
    fn new(id: TxnId, status: TxnStatus) -> Self {
        Self {
            id,
            status: AtomicU8::new(status.as_u8()),
            end_ts: AtomicU64::new(0),
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> TxnStatus {
        TxnStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(TxnStatus::Aborted)
    }

    /// Publish a new status.
    pub fn set_status(&self, status: TxnStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Commit timestamp, once assigned.
    pub fn end_ts(&self) -> Option<Timestamp> {
        match self.end_ts.load(Ordering::Acquire) {
            0 => None,
            ts => Some(ts),
        }
    }

    /// Publish the commit timestamp. Must happen before the status becomes
    /// `Committed`.
    pub fn set_end_ts(&self, ts: Timestamp) {
        self.end_ts.store(ts, Ordering::Release);
    }
}

/// Id-keyed table of in-flight transaction records.
#[derive(Debug, Default)]
pub struct TxnTable {
    records: DashMap<TxnId, Arc<TxnRecord>, BuildHasherDefault<FxHasher>>,
}

impl TxnTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attempt, replacing any stale record under the same id.
    pub fn register(&self, id: TxnId, status: TxnStatus) -> Arc<TxnRecord> {
        let record = Arc::new(TxnRecord::new(id, status));
        self.records.insert(id, Arc::clone(&record));
        record
    }

    /// Look up a record.
    pub fn get(&self, id: TxnId) -> Option<Arc<TxnRecord>> {
        self.records.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Status of `id`, or `None` when it is not registered.
    pub fn status(&self, id: TxnId) -> Option<TxnStatus> {
        self.records.get(&id).map(|r| r.status())
    }

    /// Whether a write-intent claim held by `id` may be taken over.
    ///
    /// Claims of aborted attempts and of attempts that already left the table
    /// are dead.
    pub fn claim_is_dead(&self, id: TxnId) -> bool {
        matches!(self.status(id), None | Some(TxnStatus::Aborted))
    }

    /// Drop a finished attempt. Only call once no version boundary still
    /// names it.
    pub fn remove(&self, id: TxnId) -> Option<Arc<TxnRecord>> {
        self.records.remove(&id).map(|(_, record)| record)
    }

    /// Number of registered attempts.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no attempt is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
