//! Transaction validation for OCC
//!
//! Backward validation: an attempt fails when any key of its read or write
//! set was rewritten after its read phase saw it, or when its sets intersect
//! those of an attempt validating at the same time.
//!
//! Intersection rules against a concurrent validator `other`:
//! - own write set vs `other` read set or write set
//! - own read set vs `other` write set
//!
//! Two readers of the same key never conflict.

use crate::transaction::Transaction;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use txnflow_core::{Conflict, Key, TxnId};
use txnflow_storage::VersionStore;

/// Result of transaction validation
///
/// Accumulates all conflicts found during validation.
/// A transaction commits only if is_valid() returns true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// All conflicts detected during validation
    pub conflicts: Vec<Conflict>,
}

impl ValidationResult {
    /// Successful validation
    pub fn ok() -> Self {
        Self::default()
    }

    /// Validation result with a single conflict
    pub fn conflict(conflict: Conflict) -> Self {
        Self {
            conflicts: vec![conflict],
        }
    }

    /// Check if validation passed (no conflicts)
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Compare every read/write-set key's newest committed version against the
/// version the read phase recorded.
pub fn validate_read_versions(txn: &Transaction, store: &VersionStore) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for key in txn.keys() {
        let read_at = txn.reads().get(&key).map(|read| read.begin);
        let current = store.last_write(key);
        if read_at != current {
            result.merge(ValidationResult::conflict(Conflict::StaleRead {
                key,
                read_at,
                current,
            }));
        }
    }
    result
}

/// Declared read and write sets of an attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    /// Read set
    pub readset: BTreeSet<Key>,
    /// Write set
    pub writeset: BTreeSet<Key>,
}

impl Footprint {
    /// Footprint of `txn`.
    pub fn of(txn: &Transaction) -> Self {
        Self {
            readset: txn.readset().clone(),
            writeset: txn.writeset().clone(),
        }
    }

    /// Whether committing both attempts concurrently could lose an update or
    /// expose a stale read.
    pub fn overlaps(&self, other: &Footprint) -> bool {
        !self.writeset.is_disjoint(&other.readset)
            || !self.writeset.is_disjoint(&other.writeset)
            || !self.readset.is_disjoint(&other.writeset)
    }
}

/// Attempts currently in their parallel validation window.
#[derive(Debug, Default)]
pub struct ActiveSet {
    validating: Mutex<FxHashMap<TxnId, Footprint>>,
}

impl ActiveSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically copy the current members and join the set.
    pub fn enter(&self, id: TxnId, footprint: Footprint) -> Vec<(TxnId, Footprint)> {
        let mut validating = self.validating.lock();
        let others = validating
            .iter()
            .map(|(other, fp)| (*other, fp.clone()))
            .collect();
        validating.insert(id, footprint);
        others
    }

    /// Leave the set.
    pub fn leave(&self, id: TxnId) {
        self.validating.lock().remove(&id);
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.validating.lock().len()
    }

    /// Whether nobody is validating.
    pub fn is_empty(&self) -> bool {
        self.validating.lock().is_empty()
    }
}

/// Check `own` against the validators captured by [`ActiveSet::enter`].
pub fn validate_against_active(
    own: &Footprint,
    others: &[(TxnId, Footprint)],
) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for (other, footprint) in others {
        if own.overlaps(footprint) {
            result.merge(ValidationResult::conflict(Conflict::ConcurrentValidator {
                other: *other,
            }));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxnBody, TxnContext};
    use std::sync::Arc;
    use txnflow_core::TxnStatus;
    use txnflow_storage::TxnTable;

    struct Touch {
        reads: Vec<Key>,
        writes: Vec<Key>,
    }

    impl TxnBody for Touch {
        fn name(&self) -> &'static str {
            "touch"
        }
        fn readset(&self) -> BTreeSet<Key> {
            self.reads.iter().copied().collect()
        }
        fn writeset(&self) -> BTreeSet<Key> {
            self.writes.iter().copied().collect()
        }
        fn run(&mut self, _ctx: &mut TxnContext<'_>) {}
        fn fork(&self) -> Box<dyn TxnBody> {
            Box::new(Touch {
                reads: self.reads.clone(),
                writes: self.writes.clone(),
            })
        }
    }

    fn footprint(reads: &[Key], writes: &[Key]) -> Footprint {
        Footprint {
            readset: reads.iter().copied().collect(),
            writeset: writes.iter().copied().collect(),
        }
    }

    fn read_phase(store: &VersionStore, reads: &[Key], writes: &[Key]) -> Transaction {
        let mut txn = Transaction::new(Touch {
            reads: reads.to_vec(),
            writes: writes.to_vec(),
        });
        txn.assign_id(1);
        txn.transition(TxnStatus::Active).unwrap();
        for key in txn.keys() {
            if let Some(read) = store.read_latest(key) {
                txn.record_read(key, read);
            }
        }
        txn
    }

    fn store() -> VersionStore {
        let mut store = VersionStore::new(Arc::new(TxnTable::new()));
        store.init_storage(8, 0);
        store
    }

    // ========================================================================
    // Read-version validation
    // ========================================================================

    #[test]
    fn test_untouched_keys_validate() {
        let store = store();
        let txn = read_phase(&store, &[0, 1], &[2]);
        assert!(validate_read_versions(&txn, &store).is_valid());
    }

    #[test]
    fn test_intervening_write_to_read_key_fails() {
        let store = store();
        let txn = read_phase(&store, &[0, 1], &[2]);
        store.install(1, 5, 10).unwrap();

        let result = validate_read_versions(&txn, &store);
        assert_eq!(
            result.conflicts,
            vec![Conflict::StaleRead {
                key: 1,
                read_at: Some(0),
                current: Some(10),
            }]
        );
    }

    #[test]
    fn test_intervening_write_to_write_key_fails() {
        let store = store();
        let txn = read_phase(&store, &[], &[3]);
        store.install(3, 5, 10).unwrap();
        assert_eq!(validate_read_versions(&txn, &store).conflict_count(), 1);
    }

    #[test]
    fn test_unrelated_write_passes() {
        let store = store();
        let txn = read_phase(&store, &[0], &[1]);
        store.install(5, 5, 10).unwrap();
        assert!(validate_read_versions(&txn, &store).is_valid());
    }

    // ========================================================================
    // Active set
    // ========================================================================

    #[test]
    fn test_overlap_rules() {
        let writer = footprint(&[], &[1]);
        assert!(writer.overlaps(&footprint(&[1], &[])));
        assert!(writer.overlaps(&footprint(&[], &[1])));
        assert!(footprint(&[1], &[]).overlaps(&writer));
        assert!(!footprint(&[1], &[]).overlaps(&footprint(&[1], &[])));
        assert!(!writer.overlaps(&footprint(&[2], &[3])));
    }

    #[test]
    fn test_enter_returns_previous_members() {
        let active = ActiveSet::new();
        assert!(active.enter(1, footprint(&[0], &[1])).is_empty());
        let others = active.enter(2, footprint(&[1], &[]));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].0, 1);
        assert_eq!(active.len(), 2);

        active.leave(1);
        active.leave(2);
        assert!(active.is_empty());
    }

    #[test]
    fn test_validate_against_active_reports_each_overlap() {
        let others = vec![
            (7, footprint(&[], &[1])),
            (8, footprint(&[4], &[5])),
            (9, footprint(&[2], &[])),
        ];
        let result = validate_against_active(&footprint(&[1], &[2]), &others);
        assert_eq!(
            result.conflicts,
            vec![
                Conflict::ConcurrentValidator { other: 7 },
                Conflict::ConcurrentValidator { other: 9 },
            ]
        );
    }
}
