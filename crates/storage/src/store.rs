//! Multi-version key-value store
//!
//! Every key of the key space `[0, N)` owns a chain of versions ordered
//! newest first. A per-key latch serializes chain mutation; reads of distinct
//! keys never contend.
//!
//! # Visibility
//!
//! A read at timestamp `ts` returns the version whose interval `[begin, end)`
//! contains `ts`. Speculative boundaries are resolved through the
//! [`TxnTable`]:
//!
//! | owner                                   | resolves to            |
//! |-----------------------------------------|------------------------|
//! | the reader itself                       | the read timestamp     |
//! | committed                               | its end timestamp      |
//! | deciding, end timestamp unset or `<= ts`| wait for the decision  |
//! | anything else (live, aborted, unknown)  | `INFINITY`             |
//!
//! # Write intents
//!
//! Speculative writers first claim the write intent of the version they read.
//! The claim only succeeds while that version is still the newest of its
//! chain, which makes the first committer win.

use crate::txn_table::TxnTable;
use crate::version::{Boundary, Version};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, trace};
use txnflow_core::{Error, Key, Result, Timestamp, TxnId, TxnStatus, Value, INFINITY, NO_TXN};

type Chain = VecDeque<Arc<Version>>;

/// Reads spin this many times before yielding while a writer decides.
const SPINS_BEFORE_YIELD: u32 = 64;

/// A version returned by a read, with its interval resolved for that reader.
#[derive(Debug, Clone)]
pub struct ReadVersion {
    /// The version itself
    pub version: Arc<Version>,
    /// Resolved begin timestamp
    pub begin: Timestamp,
    /// Resolved end timestamp
    pub end: Timestamp,
}

impl ReadVersion {
    /// Value of the version.
    pub fn value(&self) -> Value {
        self.version.value()
    }

    /// Whether `ts` falls inside the resolved interval.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.begin <= ts && ts < self.end
    }
}

/// Multi-version store over a dense key space.
pub struct VersionStore {
    chains: Vec<Mutex<Chain>>,
    txns: Arc<TxnTable>,
}

impl VersionStore {
    /// Create an empty store resolving speculative boundaries through `txns`.
    pub fn new(txns: Arc<TxnTable>) -> Self {
        Self {
            chains: Vec::new(),
            txns,
        }
    }

    /// Populate keys `[0, key_space)` with `initial` valid from timestamp 0.
    ///
    /// Replaces any previous content.
    pub fn init_storage(&mut self, key_space: u64, initial: Value) {
        self.chains = (0..key_space)
            .map(|_| {
                let mut chain = VecDeque::with_capacity(1);
                chain.push_front(Arc::new(Version::committed(initial, 0)));
                Mutex::new(chain)
            })
            .collect();
        info!(target: "txnflow::store", key_space, initial, "Storage initialized");
    }

    /// Number of keys.
    pub fn key_space(&self) -> u64 {
        self.chains.len() as u64
    }

    /// Whether `key` is inside the key space.
    pub fn contains(&self, key: Key) -> bool {
        self.chain(key).is_some()
    }

    /// The table speculative boundaries are resolved against.
    pub fn txn_table(&self) -> &Arc<TxnTable> {
        &self.txns
    }

    fn chain(&self, key: Key) -> Option<&Mutex<Chain>> {
        usize::try_from(key).ok().and_then(|i| self.chains.get(i))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Version of `key` visible at `as_of` to `reader`.
    ///
    /// Blocks while a writer that committed at or before `as_of`, or has not
    /// yet drawn its commit timestamp, is still deciding. The latch is not
    /// held while waiting.
    pub fn read(&self, key: Key, as_of: Timestamp, reader: TxnId) -> Option<ReadVersion> {
        let chain = self.chain(key)?;
        let mut spins = 0u32;
        loop {
            match self.scan(&chain.lock(), as_of, reader) {
                Ok(found) => return found,
                Err(owner) => {
                    trace!(target: "txnflow::store", key, as_of, owner, "Read waits on deciding writer");
                }
            }
            spins += 1;
            if spins < SPINS_BEFORE_YIELD {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Newest committed version of `key`.
    pub fn read_latest(&self, key: Key) -> Option<ReadVersion> {
        let chain = self.chain(key)?;
        let versions = chain.lock();
        newest_committed(&versions)
    }

    /// Begin timestamp of the newest committed version of `key`.
    pub fn last_write(&self, key: Key) -> Option<Timestamp> {
        self.read_latest(key).map(|read| read.begin)
    }

    fn scan(
        &self,
        versions: &Chain,
        as_of: Timestamp,
        reader: TxnId,
    ) -> std::result::Result<Option<ReadVersion>, TxnId> {
        for version in versions {
            let begin = self.resolve(version.begin(), as_of, reader)?;
            if begin > as_of {
                continue;
            }
            let end = self.resolve(version.end(), as_of, reader)?;
            if as_of < end {
                return Ok(Some(ReadVersion {
                    version: Arc::clone(version),
                    begin,
                    end,
                }));
            }
        }
        Ok(None)
    }

    /// `Err(owner)` when the boundary depends on a decision still in flight.
    fn resolve(
        &self,
        boundary: Boundary,
        as_of: Timestamp,
        reader: TxnId,
    ) -> std::result::Result<Timestamp, TxnId> {
        let owner = match boundary {
            Boundary::At(ts) => return Ok(ts),
            Boundary::Pending(owner) => owner,
        };
        if owner == reader {
            return Ok(as_of);
        }
        let Some(record) = self.txns.get(owner) else {
            return Ok(INFINITY);
        };
        match record.status() {
            TxnStatus::Committed => Ok(record.end_ts().unwrap_or(INFINITY)),
            TxnStatus::CompletedCommit => match record.end_ts() {
                Some(end) if end > as_of => Ok(INFINITY),
                _ => Err(owner),
            },
            _ => Ok(INFINITY),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Claim the write intent of `read` for `txn`.
    ///
    /// Fails when a newer version exists or a live or committed writer holds
    /// the claim. Claims of aborted writers are taken over.
    pub fn check_write(&self, key: Key, read: &Arc<Version>, txn: TxnId) -> bool {
        match self.chain(key) {
            Some(chain) => claim_head(&chain.lock(), read, txn, &self.txns),
            None => false,
        }
    }

    /// Push a speculative version written by `txn` in front of the version
    /// it claimed. Returns the new version.
    pub fn finish_write(&self, key: Key, value: Value, txn: TxnId) -> Result<Arc<Version>> {
        let chain = self.chain(key).ok_or(Error::UnknownKey(key))?;
        let mut versions = chain.lock();
        if let Some(head) = versions.front() {
            debug_assert_eq!(head.intent(), Some(txn), "finish_write without claim");
            head.set_end(Boundary::Pending(txn));
        }
        let version = Arc::new(Version::pending(value, txn));
        versions.push_front(Arc::clone(&version));
        Ok(version)
    }

    /// Stamp the commit timestamp onto a superseded/new version pair.
    pub fn close_version(&self, key: Key, old: &Version, new: &Version, ts: Timestamp) {
        if let Some(chain) = self.chain(key) {
            let _latch = chain.lock();
            new.set_begin(Boundary::At(ts));
            old.set_end(Boundary::At(ts));
        }
    }

    /// Undo `finish_write` and the claim of an attempt that will not commit.
    pub fn abandon_write(&self, key: Key, txn: TxnId) {
        let Some(chain) = self.chain(key) else {
            return;
        };
        let mut versions = chain.lock();
        if versions
            .front()
            .is_some_and(|head| head.begin() == Boundary::Pending(txn))
        {
            versions.pop_front();
        }
        if let Some(head) = versions.front() {
            if head.end() == Boundary::Pending(txn) {
                head.set_end(Boundary::At(INFINITY));
            }
            head.release_intent(txn);
        }
    }

    /// Write a committed version valid from `ts`, closing the previous one.
    pub fn install(&self, key: Key, value: Value, ts: Timestamp) -> Result<Arc<Version>> {
        let chain = self.chain(key).ok_or(Error::UnknownKey(key))?;
        Ok(install_into(&mut chain.lock(), value, ts))
    }

    /// Hold the latch of `key`.
    pub fn latch(&self, key: Key) -> Option<KeyLatch<'_>> {
        self.chain(key).map(|chain| KeyLatch {
            key,
            versions: chain.lock(),
            txns: &self.txns,
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of versions stored for `key`.
    pub fn version_count(&self, key: Key) -> usize {
        self.chain(key).map_or(0, |chain| chain.lock().len())
    }

    /// All versions of `key`, newest first.
    pub fn history(&self, key: Key) -> Vec<Arc<Version>> {
        self.chain(key)
            .map(|chain| chain.lock().iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// A held per-key latch.
///
/// Lets a committer check and install several keys without any other writer
/// touching them in between.
pub struct KeyLatch<'a> {
    key: Key,
    versions: MutexGuard<'a, Chain>,
    txns: &'a TxnTable,
}

impl KeyLatch<'_> {
    /// Latched key.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Same as [`VersionStore::check_write`] under the held latch.
    pub fn check_write(&self, read: &Arc<Version>, txn: TxnId) -> bool {
        claim_head(&self.versions, read, txn, self.txns)
    }

    /// Same as [`VersionStore::install`] under the held latch.
    pub fn install(&mut self, value: Value, ts: Timestamp) -> Arc<Version> {
        install_into(&mut self.versions, value, ts)
    }
}

fn newest_committed(versions: &Chain) -> Option<ReadVersion> {
    versions.iter().find_map(|version| match version.begin() {
        Boundary::At(begin) => Some(ReadVersion {
            version: Arc::clone(version),
            begin,
            end: match version.end() {
                Boundary::At(end) => end,
                Boundary::Pending(_) => INFINITY,
            },
        }),
        Boundary::Pending(_) => None,
    })
}

fn claim_head(versions: &Chain, read: &Arc<Version>, txn: TxnId, txns: &TxnTable) -> bool {
    match versions.front() {
        Some(head) if Arc::ptr_eq(head, read) => {}
        _ => return false,
    }
    let mut expected = NO_TXN;
    loop {
        match read.try_claim(expected, txn) {
            Ok(()) => return true,
            Err(holder) if holder == txn => return true,
            Err(holder) if holder != NO_TXN && txns.claim_is_dead(holder) => {
                trace!(target: "txnflow::store", holder, txn, "Stealing write intent of aborted writer");
                expected = holder;
            }
            Err(NO_TXN) => expected = NO_TXN,
            Err(_) => return false,
        }
    }
}

fn install_into(versions: &mut Chain, value: Value, ts: Timestamp) -> Arc<Version> {
    if let Some(head) = versions.front() {
        head.set_end(Boundary::At(ts));
    }
    let version = Arc::new(Version::committed(value, ts));
    versions.push_front(Arc::clone(&version));
    version
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(keys: u64) -> VersionStore {
        let mut store = VersionStore::new(Arc::new(TxnTable::new()));
        store.init_storage(keys, 0);
        store
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    #[test]
    fn test_init_storage_populates_every_key() {
        let store = store(10);
        assert_eq!(store.key_space(), 10);
        for key in 0..10 {
            let read = store.read(key, 1, NO_TXN).unwrap();
            assert_eq!(read.value(), 0);
            assert_eq!(read.begin, 0);
            assert_eq!(read.end, INFINITY);
        }
        assert!(!store.contains(10));
    }

    #[test]
    fn test_unknown_key_reads_nothing() {
        let store = store(4);
        assert!(store.read(4, 1, NO_TXN).is_none());
        assert!(store.read_latest(u64::MAX).is_none());
        assert!(store.last_write(7).is_none());
    }

    #[test]
    fn test_install_unknown_key_errors() {
        let store = store(1);
        assert!(matches!(store.install(3, 1, 5), Err(Error::UnknownKey(3))));
    }

    // ========================================================================
    // Committed versions
    // ========================================================================

    #[test]
    fn test_reads_pick_interval_containing_timestamp() {
        let store = store(1);
        store.install(0, 10, 5).unwrap();
        store.install(0, 20, 9).unwrap();

        assert_eq!(store.read(0, 4, NO_TXN).unwrap().value(), 0);
        assert_eq!(store.read(0, 5, NO_TXN).unwrap().value(), 10);
        assert_eq!(store.read(0, 8, NO_TXN).unwrap().value(), 10);
        assert_eq!(store.read(0, 9, NO_TXN).unwrap().value(), 20);
        assert_eq!(store.read(0, 1000, NO_TXN).unwrap().value(), 20);
        assert_eq!(store.version_count(0), 3);
        assert_eq!(store.last_write(0), Some(9));
    }

    #[test]
    fn test_install_closes_previous_version() {
        let store = store(1);
        store.install(0, 1, 3).unwrap();
        let history = store.history(0);
        assert_eq!(history[0].begin(), Boundary::At(3));
        assert_eq!(history[0].end(), Boundary::At(INFINITY));
        assert_eq!(history[1].end(), Boundary::At(3));
    }

    // ========================================================================
    // Speculative versions
    // ========================================================================

    #[test]
    fn test_pending_version_invisible_to_others() {
        let store = store(1);
        let txns = Arc::clone(store.txn_table());
        txns.register(7, TxnStatus::Active);

        let read = store.read(0, 7, 7).unwrap();
        assert!(store.check_write(0, &read.version, 7));
        store.finish_write(0, 42, 7).unwrap();

        assert_eq!(store.read(0, 100, 8).unwrap().value(), 0);
        assert_eq!(store.read(0, 7, 7).unwrap().value(), 42);
    }

    #[test]
    fn test_committed_pending_resolves_to_end_timestamp() {
        let store = store(1);
        let txns = Arc::clone(store.txn_table());
        let record = txns.register(7, TxnStatus::Active);

        let read = store.read(0, 7, 7).unwrap();
        assert!(store.check_write(0, &read.version, 7));
        store.finish_write(0, 42, 7).unwrap();
        record.set_end_ts(12);
        record.set_status(TxnStatus::Committed);

        assert_eq!(store.read(0, 11, 20).unwrap().value(), 0);
        let after = store.read(0, 12, 20).unwrap();
        assert_eq!(after.value(), 42);
        assert_eq!(after.begin, 12);
    }

    #[test]
    fn test_close_version_stamps_boundaries() {
        let store = store(1);
        store.txn_table().register(3, TxnStatus::Active);
        let read = store.read(0, 3, 3).unwrap();
        assert!(store.check_write(0, &read.version, 3));
        let new = store.finish_write(0, 5, 3).unwrap();
        store.close_version(0, &read.version, &new, 9);
        store.txn_table().remove(3);

        assert_eq!(read.version.end(), Boundary::At(9));
        assert_eq!(new.begin(), Boundary::At(9));
        assert_eq!(store.read(0, 9, NO_TXN).unwrap().value(), 5);
        assert_eq!(store.read(0, 8, NO_TXN).unwrap().value(), 0);
    }

    #[test]
    fn test_abandon_write_restores_chain() {
        let store = store(1);
        store.txn_table().register(3, TxnStatus::Active);
        let read = store.read(0, 3, 3).unwrap();
        assert!(store.check_write(0, &read.version, 3));
        store.finish_write(0, 5, 3).unwrap();

        store.abandon_write(0, 3);
        assert_eq!(store.version_count(0), 1);
        assert_eq!(read.version.end(), Boundary::At(INFINITY));
        assert_eq!(read.version.intent(), None);
    }

    #[test]
    fn test_aborted_pending_is_invisible() {
        let store = store(1);
        let record = store.txn_table().register(3, TxnStatus::Active);
        let read = store.read(0, 3, 3).unwrap();
        assert!(store.check_write(0, &read.version, 3));
        store.finish_write(0, 5, 3).unwrap();
        record.set_status(TxnStatus::Aborted);

        assert_eq!(store.read(0, 50, 9).unwrap().value(), 0);
    }

    // ========================================================================
    // Write intents
    // ========================================================================

    #[test]
    fn test_check_write_live_holder_blocks() {
        let store = store(1);
        store.txn_table().register(1, TxnStatus::Active);
        store.txn_table().register(2, TxnStatus::Active);
        let read = store.read(0, 2, 2).unwrap();

        assert!(store.check_write(0, &read.version, 1));
        assert!(!store.check_write(0, &read.version, 2));
        assert!(store.check_write(0, &read.version, 1), "re-claim by holder");
    }

    #[test]
    fn test_check_write_steals_from_aborted() {
        let store = store(1);
        let first = store.txn_table().register(1, TxnStatus::Active);
        store.txn_table().register(2, TxnStatus::Active);
        let read = store.read(0, 2, 2).unwrap();

        assert!(store.check_write(0, &read.version, 1));
        first.set_status(TxnStatus::Aborted);
        assert!(store.check_write(0, &read.version, 2));
        assert_eq!(read.version.intent(), Some(2));
    }

    #[test]
    fn test_check_write_committed_holder_blocks() {
        let store = store(1);
        let first = store.txn_table().register(1, TxnStatus::Active);
        store.txn_table().register(2, TxnStatus::Active);
        let read = store.read(0, 2, 2).unwrap();

        assert!(store.check_write(0, &read.version, 1));
        first.set_status(TxnStatus::Committed);
        assert!(!store.check_write(0, &read.version, 2));
    }

    #[test]
    fn test_check_write_rejects_superseded_read() {
        let store = store(1);
        let stale = store.read(0, 1, NO_TXN).unwrap();
        store.install(0, 1, 4).unwrap();
        store.txn_table().register(5, TxnStatus::Active);
        assert!(!store.check_write(0, &stale.version, 5));
    }

    #[test]
    fn test_check_write_unknown_key() {
        let store = store(1);
        let read = store.read(0, 1, NO_TXN).unwrap();
        assert!(!store.check_write(9, &read.version, 5));
    }

    #[test]
    fn test_latch_check_and_install() {
        let store = store(2);
        store.txn_table().register(4, TxnStatus::Active);
        let read = store.read(1, 4, 4).unwrap();
        {
            let mut latch = store.latch(1).unwrap();
            assert_eq!(latch.key(), 1);
            assert!(latch.check_write(&read.version, 4));
            latch.install(8, 6);
        }
        assert_eq!(store.read(1, 6, NO_TXN).unwrap().value(), 8);
        assert!(store.latch(2).is_none());
    }
}
