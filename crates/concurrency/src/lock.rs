//! Lock manager
//!
//! Each key has a FIFO queue of lock requests. Two policies share the queue
//! machinery:
//! - [`ExclusiveLockManager`]: every request is exclusive; the head of the
//!   queue owns the key.
//! - [`SharedLockManager`]: reads queue as shared, writes as exclusive. A
//!   shared request is granted when everything ahead of it is shared.
//!
//! Every transaction with blocked requests has a wait counter. A release
//! decrements the counter of each transaction it newly grants, exactly once,
//! and reports the transactions whose counter reached zero.
//!
//! There is no deadlock detection. Callers must never hold a partial lock set
//! across a block.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::trace;
use txnflow_core::{Key, TxnId};

/// Mode a key is locked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// No owner
    Unlocked,
    /// One or more readers
    Shared,
    /// A single writer
    Exclusive,
}

/// Current owners of a key.
pub type Owners = SmallVec<[TxnId; 4]>;

/// Interchangeable locking policy.
pub trait LockManager: Send {
    /// Request an exclusive lock. `true` when granted immediately.
    fn write_lock(&mut self, txn: TxnId, key: Key) -> bool;

    /// Request a read lock. `true` when granted immediately.
    fn read_lock(&mut self, txn: TxnId, key: Key) -> bool;

    /// Remove every request of `txn` on `key`. Returns the transactions that
    /// now hold every lock they were waiting for. A withdrawn request that was
    /// still waiting stops counting against `txn`.
    fn release(&mut self, txn: TxnId, key: Key) -> Vec<TxnId>;

    /// Mode and owners of `key`.
    fn status(&self, key: Key) -> (LockMode, Owners);

    /// Drop the wait counter of `txn`.
    fn forget(&mut self, txn: TxnId);

    /// Number of locks `txn` is still waiting for.
    fn waiting(&self, txn: TxnId) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockRequest {
    exclusive: bool,
    txn: TxnId,
}

/// Queue machinery shared by both policies.
#[derive(Debug, Default)]
struct LockTable {
    queues: FxHashMap<Key, VecDeque<LockRequest>>,
    waits: FxHashMap<TxnId, usize>,
}

impl LockTable {
    fn request(&mut self, txn: TxnId, key: Key, exclusive: bool) -> bool {
        let queue = self.queues.entry(key).or_default();
        queue.push_back(LockRequest { exclusive, txn });
        let granted = is_granted(queue, queue.len() - 1);
        if !granted {
            *self.waits.entry(txn).or_insert(0) += 1;
            trace!(target: "txnflow::lock", txn, key, exclusive, "Lock request queued");
        }
        granted
    }

    fn release(&mut self, txn: TxnId, key: Key) -> Vec<TxnId> {
        let Some(queue) = self.queues.get_mut(&key) else {
            return Vec::new();
        };
        let before = owners(queue);
        let withdrew_wait = !before.contains(&txn) && queue.iter().any(|r| r.txn == txn);
        queue.retain(|request| request.txn != txn);
        let after = owners(queue);
        if queue.is_empty() {
            self.queues.remove(&key);
        }

        if withdrew_wait {
            self.decrement(txn);
        }

        let mut ready = Vec::new();
        for owner in after {
            if owner == txn || before.contains(&owner) {
                continue;
            }
            if self.decrement(owner) {
                ready.push(owner);
            }
        }
        if !ready.is_empty() {
            trace!(target: "txnflow::lock", txn, key, ?ready, "Release granted waiters");
        }
        ready
    }

    /// Returns `true` when the counter of `txn` reached zero.
    fn decrement(&mut self, txn: TxnId) -> bool {
        let Some(count) = self.waits.get_mut(&txn) else {
            return false;
        };
        debug_assert!(*count > 0, "wait counter underflow for {}", txn);
        *count -= 1;
        if *count == 0 {
            self.waits.remove(&txn);
            true
        } else {
            false
        }
    }

    fn status(&self, key: Key) -> (LockMode, Owners) {
        let Some(queue) = self.queues.get(&key) else {
            return (LockMode::Unlocked, Owners::new());
        };
        let mode = match queue.front() {
            None => LockMode::Unlocked,
            Some(head) if head.exclusive => LockMode::Exclusive,
            Some(_) => LockMode::Shared,
        };
        (mode, owners(queue))
    }

    fn forget(&mut self, txn: TxnId) {
        self.waits.remove(&txn);
    }

    fn waiting(&self, txn: TxnId) -> usize {
        self.waits.get(&txn).copied().unwrap_or(0)
    }
}

/// Whether the request at `index` currently holds the lock.
fn is_granted(queue: &VecDeque<LockRequest>, index: usize) -> bool {
    if queue[index].exclusive {
        index == 0
    } else {
        queue.iter().take(index).all(|request| !request.exclusive)
    }
}

fn owners(queue: &VecDeque<LockRequest>) -> Owners {
    let mut owners = Owners::new();
    match queue.front() {
        None => {}
        Some(head) if head.exclusive => owners.push(head.txn),
        Some(_) => {
            for request in queue.iter().take_while(|request| !request.exclusive) {
                if !owners.contains(&request.txn) {
                    owners.push(request.txn);
                }
            }
        }
    }
    owners
}

/// Every request exclusive.
#[derive(Debug, Default)]
pub struct ExclusiveLockManager {
    table: LockTable,
}

impl ExclusiveLockManager {
    /// Empty lock manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for ExclusiveLockManager {
    fn write_lock(&mut self, txn: TxnId, key: Key) -> bool {
        self.table.request(txn, key, true)
    }

    fn read_lock(&mut self, txn: TxnId, key: Key) -> bool {
        self.table.request(txn, key, true)
    }

    fn release(&mut self, txn: TxnId, key: Key) -> Vec<TxnId> {
        self.table.release(txn, key)
    }

    fn status(&self, key: Key) -> (LockMode, Owners) {
        self.table.status(key)
    }

    fn forget(&mut self, txn: TxnId) {
        self.table.forget(txn)
    }

    fn waiting(&self, txn: TxnId) -> usize {
        self.table.waiting(txn)
    }
}

/// Shared read locks, exclusive write locks.
#[derive(Debug, Default)]
pub struct SharedLockManager {
    table: LockTable,
}

impl SharedLockManager {
    /// Empty lock manager.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for SharedLockManager {
    fn write_lock(&mut self, txn: TxnId, key: Key) -> bool {
        self.table.request(txn, key, true)
    }

    fn read_lock(&mut self, txn: TxnId, key: Key) -> bool {
        self.table.request(txn, key, false)
    }

    fn release(&mut self, txn: TxnId, key: Key) -> Vec<TxnId> {
        self.table.release(txn, key)
    }

    fn status(&self, key: Key) -> (LockMode, Owners) {
        self.table.status(key)
    }

    fn forget(&mut self, txn: TxnId) {
        self.table.forget(txn)
    }

    fn waiting(&self, txn: TxnId) -> usize {
        self.table.waiting(txn)
    }
}
