//! Versions and their validity boundaries
//!
//! A version is valid over `[begin, end)`. Either boundary may be speculative,
//! naming the in-flight writer whose commit timestamp is not yet known.
//! Boundaries and the write-intent marker are atomics so a version can be
//! shared as `Arc<Version>` between the chain and the transactions that read it.

use std::sync::atomic::{AtomicU64, Ordering};
use txnflow_core::{Timestamp, TxnId, Value, INFINITY, NO_TXN};

const PENDING_BIT: u64 = 1 << 63;

/// One end of a version's validity interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Concrete timestamp (`INFINITY` for an open end)
    At(Timestamp),
    /// Final timestamp decided by the named transaction's commit
    Pending(TxnId),
}

impl Boundary {
    fn encode(self) -> u64 {
        match self {
            Boundary::At(ts) => ts,
            Boundary::Pending(txn) => {
                debug_assert!(txn < PENDING_BIT - 1, "txn id {} out of range", txn);
                PENDING_BIT | txn
            }
        }
    }

    fn decode(raw: u64) -> Self {
        if raw == INFINITY || raw & PENDING_BIT == 0 {
            Boundary::At(raw)
        } else {
            Boundary::Pending(raw & !PENDING_BIT)
        }
    }

    /// Whether the boundary is still speculative.
    pub fn is_pending(self) -> bool {
        matches!(self, Boundary::Pending(_))
    }
}

#[derive(Debug)]
struct AtomicBoundary(AtomicU64);

impl AtomicBoundary {
    fn new(boundary: Boundary) -> Self {
        Self(AtomicU64::new(boundary.encode()))
    }

    fn load(&self) -> Boundary {
        Boundary::decode(self.0.load(Ordering::Acquire))
    }

    fn store(&self, boundary: Boundary) {
        self.0.store(boundary.encode(), Ordering::Release);
    }
}

/// A single value of a key with its validity interval.
#[derive(Debug)]
pub struct Version {
    value: Value,
    begin: AtomicBoundary,
    end: AtomicBoundary,
    /// Id of the writer holding the write intent, `NO_TXN` when unclaimed
    intent: AtomicU64,
}

impl Version {
    /// Committed version valid over `[begin, ∞)`.
    pub fn committed(value: Value, begin: Timestamp) -> Self {
        Self {
            value,
            begin: AtomicBoundary::new(Boundary::At(begin)),
            end: AtomicBoundary::new(Boundary::At(INFINITY)),
            intent: AtomicU64::new(NO_TXN),
        }
    }

    /// Speculative version written by `writer`, valid from its commit on.
    pub fn pending(value: Value, writer: TxnId) -> Self {
        Self {
            value,
            begin: AtomicBoundary::new(Boundary::Pending(writer)),
            end: AtomicBoundary::new(Boundary::At(INFINITY)),
            intent: AtomicU64::new(NO_TXN),
        }
    }

    /// Stored value.
    pub fn value(&self) -> Value {
        self.value
    }

    /// Begin boundary.
    pub fn begin(&self) -> Boundary {
        self.begin.load()
    }

    /// End boundary.
    pub fn end(&self) -> Boundary {
        self.end.load()
    }

    pub(crate) fn set_begin(&self, boundary: Boundary) {
        self.begin.store(boundary);
    }

    /// Concrete end boundaries never move once set.
    pub(crate) fn set_end(&self, boundary: Boundary) {
        debug_assert!(
            matches!(self.end.load(), Boundary::At(INFINITY) | Boundary::Pending(_)),
            "end boundary already fixed at {:?}",
            self.end.load()
        );
        self.end.store(boundary);
    }

    /// Whether the begin boundary is concrete.
    pub fn is_committed(&self) -> bool {
        !self.begin().is_pending()
    }

    /// Current write-intent holder.
    pub fn intent(&self) -> Option<TxnId> {
        match self.intent.load(Ordering::Acquire) {
            NO_TXN => None,
            txn => Some(txn),
        }
    }

    /// Swap the intent holder from `expected` to `txn`. Returns the actual
    /// holder on failure.
    pub(crate) fn try_claim(&self, expected: TxnId, txn: TxnId) -> Result<(), TxnId> {
        self.intent
            .compare_exchange(expected, txn, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    /// Drop `txn`'s claim. No-op when someone else holds it.
    pub fn release_intent(&self, txn: TxnId) -> bool {
        self.try_claim(txn, NO_TXN).is_ok()
    }
}
