//! Processor tests across every concurrency mode
//!
//! Each scenario runs once per `CcMode`; a failure message names the mode.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use txnflow_concurrency::{Transaction, TxnBody, TxnContext};
use txnflow_core::{CcMode, EngineConfig, Error, Key, TxnStatus};
use txnflow_engine::{Expect, Noop, Put, Rmw, TxnProcessor, WriteCheck};

// ============================================================================
// Test Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn processor(mode: CcMode, key_space: u64) -> TxnProcessor {
    init_tracing();
    let config = EngineConfig::for_mode(mode)
        .with_worker_threads(4)
        .with_key_space(key_space);
    TxnProcessor::new(config).unwrap()
}

fn run_one(processor: &TxnProcessor, body: impl TxnBody + 'static) -> Transaction {
    processor.submit(Transaction::new(body)).unwrap();
    processor.await_result().unwrap()
}

fn collect(processor: &TxnProcessor, count: usize) -> Vec<Transaction> {
    (0..count).map(|_| processor.await_result().unwrap()).collect()
}

// ============================================================================
// Basic scenarios
// ============================================================================

#[test]
fn test_put_then_expect_in_every_mode() {
    for mode in CcMode::ALL {
        let p = processor(mode, 100);

        let put = run_one(&p, Put::new([(1, 2)]));
        assert_eq!(put.status(), TxnStatus::Committed, "{mode}");
        assert!(put.end_ts().is_some(), "{mode}");

        let hit = run_one(&p, Expect::new([(1, 2)]));
        assert_eq!(hit.status(), TxnStatus::Committed, "{mode}");

        let wrong_key = run_one(&p, Expect::new([(0, 2)]));
        assert_eq!(wrong_key.status(), TxnStatus::Aborted, "{mode}");

        let wrong_value = run_one(&p, Expect::new([(1, 1)]));
        assert_eq!(wrong_value.status(), TxnStatus::Aborted, "{mode}");
        assert_eq!(wrong_value.restarts(), 0, "{mode}");

        assert_eq!(p.latest_value(1), Some(2), "{mode}");
        assert_eq!(p.latest_value(0), Some(0), "{mode}");
    }
}

#[test]
fn test_noop_commits_in_every_mode() {
    for mode in CcMode::ALL {
        let p = processor(mode, 10);
        let done = run_one(&p, Noop);
        assert_eq!(done.status(), TxnStatus::Committed, "{mode}");
        assert!(done.writes().is_empty());
    }
}

#[test]
fn test_large_put_then_expect() {
    for mode in CcMode::ALL {
        let p = processor(mode, 2000);
        let values: Vec<(Key, i64)> = (0..1000).map(|k| (k, k as i64 * 3)).collect();

        let put = run_one(&p, Put::new(values.clone()));
        assert_eq!(put.status(), TxnStatus::Committed, "{mode}");
        let expect = run_one(&p, Expect::new(values));
        assert_eq!(expect.status(), TxnStatus::Committed, "{mode}");
    }
}

#[test]
fn test_write_outside_key_space_is_terminal() {
    for mode in CcMode::ALL {
        let p = processor(mode, 10);
        let done = run_one(&p, Put::new([(3, 1), (50, 1)]));
        assert_eq!(done.status(), TxnStatus::Aborted, "{mode}");
        assert_eq!(done.restarts(), 0, "{mode}");
        assert_eq!(p.latest_value(3), Some(0), "{mode}");
        assert_eq!(p.latest_value(50), None, "{mode}");
    }
}

#[test]
fn test_initial_value_is_visible() {
    init_tracing();
    let config = EngineConfig::for_mode(CcMode::Mvcc)
        .with_key_space(4)
        .with_initial_value(7);
    let p = TxnProcessor::new(config).unwrap();
    let done = run_one(&p, Expect::new([(0, 7), (3, 7)]));
    assert_eq!(done.status(), TxnStatus::Committed);
}

// ============================================================================
// Contention
// ============================================================================

#[test]
fn test_concurrent_increments_lose_no_updates() {
    const HOT_KEYS: u64 = 4;
    const TXNS: usize = 200;

    for mode in CcMode::ALL {
        let p = processor(mode, 64);
        let mut rng = StdRng::seed_from_u64(mode as u64);
        let mut expected = [0i64; HOT_KEYS as usize];

        for _ in 0..TXNS {
            let first = rng.gen_range(0..HOT_KEYS);
            let second = rng.gen_range(0..HOT_KEYS);
            let writes: BTreeSet<Key> = [first, second].into_iter().collect();
            for key in &writes {
                expected[*key as usize] += 1;
            }
            let reads = [rng.gen_range(HOT_KEYS..64)];
            p.submit(Transaction::new(Rmw::new(reads, writes))).unwrap();
        }

        let done = collect(&p, TXNS);
        assert!(done.iter().all(|t| t.status() == TxnStatus::Committed), "{mode}");
        for key in 0..HOT_KEYS {
            assert_eq!(p.latest_value(key), Some(expected[key as usize]), "{mode} key {key}");
        }

        let stats = p.stats();
        assert_eq!(stats.submitted, TXNS as u64, "{mode}");
        assert_eq!(stats.committed, TXNS as u64, "{mode}");
        assert_eq!(stats.in_flight(), 0, "{mode}");
        let restarts: u64 = done.iter().map(|t| u64::from(t.restarts())).sum();
        assert_eq!(stats.restarts, restarts, "{mode}");
    }
}

#[test]
fn test_concurrent_submitters() {
    for mode in [CcMode::SharedLocking, CcMode::ParallelOcc, CcMode::SnapshotIsolation] {
        let p = Arc::new(processor(mode, 16));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&p);
                thread::spawn(move || {
                    for _ in 0..25 {
                        p.submit(Transaction::new(Rmw::new(Vec::<Key>::new(), [0]))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let done = collect(&p, 100);
        assert!(done.iter().all(|t| t.status() == TxnStatus::Committed), "{mode}");
        assert_eq!(p.latest_value(0), Some(100), "{mode}");
    }
}

#[test]
fn test_retries_get_fresh_ids() {
    let p = processor(CcMode::Occ, 4);
    let ids: Vec<_> = (0..50)
        .map(|_| {
            let body = Rmw::new(Vec::<Key>::new(), [1]).with_work(Duration::from_micros(50));
            p.submit(Transaction::new(body)).unwrap()
        })
        .collect();
    let done = collect(&p, 50);

    let final_ids: BTreeSet<_> = done.iter().map(|t| t.id()).collect();
    assert_eq!(final_ids.len(), 50);
    for txn in done.iter().filter(|t| t.restarts() == 0) {
        assert!(ids.contains(&txn.id()));
    }
    for txn in done.iter().filter(|t| t.restarts() > 0) {
        assert!(!ids.contains(&txn.id()));
    }
    assert_eq!(p.latest_value(1), Some(50));
}

// ============================================================================
// Write skew
// ============================================================================

fn write_skew_round(mode: CcMode) -> (Vec<Transaction>, i64) {
    let p = processor(mode, 2);
    run_one(&p, Put::new([(0, 50), (1, 50)]));
    p.submit(Transaction::new(WriteCheck::from_checking(0, 1, 80, 0)))
        .unwrap();
    p.submit(Transaction::new(WriteCheck::from_savings(0, 1, 80, 0)))
        .unwrap();
    let done = collect(&p, 2);
    let sum = p.latest_value(0).unwrap() + p.latest_value(1).unwrap();
    (done, sum)
}

#[test]
fn test_constrained_snapshot_prevents_write_skew() {
    for _ in 0..20 {
        let (done, sum) = write_skew_round(CcMode::ConstrainedSnapshotIsolation);
        let committed = done
            .iter()
            .filter(|t| t.status() == TxnStatus::Committed)
            .count();
        assert_eq!(committed, 1);
        assert_eq!(sum, 20);
    }
}

#[test]
fn test_snapshot_isolation_finishes_write_check_pairs() {
    for _ in 0..20 {
        let (done, sum) = write_skew_round(CcMode::SnapshotIsolation);
        let committed = done
            .iter()
            .filter(|t| t.status() == TxnStatus::Committed)
            .count();
        // Both withdrawals may commit from the same snapshot.
        assert!(committed == 1 || committed == 2);
        assert_eq!(sum, 100 - 80 * committed as i64);
    }
}

#[test]
fn test_serializable_modes_prevent_write_skew() {
    for mode in [
        CcMode::Serial,
        CcMode::ExclusiveLocking,
        CcMode::SharedLocking,
        CcMode::Occ,
        CcMode::ParallelOcc,
    ] {
        let (_, sum) = write_skew_round(mode);
        assert_eq!(sum, 20, "{mode}");
    }
}

// ============================================================================
// Failure handling
// ============================================================================

#[derive(Clone)]
struct ReadsUndeclared;

impl TxnBody for ReadsUndeclared {
    fn name(&self) -> &'static str {
        "reads-undeclared"
    }

    fn readset(&self) -> BTreeSet<Key> {
        BTreeSet::from([0])
    }

    fn writeset(&self) -> BTreeSet<Key> {
        BTreeSet::new()
    }

    fn run(&mut self, ctx: &mut TxnContext<'_>) {
        let _ = ctx.read(1);
    }

    fn fork(&self) -> Box<dyn TxnBody> {
        Box::new(self.clone())
    }
}

#[test]
fn test_contract_violation_poisons_processor() {
    for mode in [CcMode::Serial, CcMode::Occ, CcMode::SnapshotIsolation] {
        let p = processor(mode, 4);
        p.submit(Transaction::new(ReadsUndeclared)).unwrap();
        assert!(matches!(p.await_result(), Err(Error::WorkerPanicked(_))), "{mode}");
        assert!(matches!(p.await_result(), Err(Error::WorkerPanicked(_))), "{mode}");
    }
}

#[test]
fn test_submit_rejects_started_transaction() {
    let p = processor(CcMode::Mvcc, 4);
    let mut txn = Transaction::new(Noop);
    txn.transition(TxnStatus::Active).unwrap();
    assert!(matches!(p.submit(txn), Err(Error::InvalidTransition { .. })));
}

#[test]
fn test_shutdown_stops_processor() {
    let p = processor(CcMode::ParallelOcc, 4);
    run_one(&p, Noop);
    p.shutdown();
    p.shutdown();
    assert!(matches!(p.submit(Transaction::new(Noop)), Err(Error::ShutDown)));
    assert!(matches!(p.await_result(), Err(Error::ShutDown)));
}

#[test]
fn test_await_result_timeout_without_work() {
    let p = processor(CcMode::SharedLocking, 4);
    let waited = p.await_result_timeout(Duration::from_millis(20)).unwrap();
    assert!(waited.is_none());

    p.submit(Transaction::new(Noop)).unwrap();
    let done = p.await_result_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(done.map(|t| t.status()), Some(TxnStatus::Committed));
}

#[test]
fn test_snapshot_keeps_superseded_versions() {
    let p = processor(CcMode::SnapshotIsolation, 4);
    for value in 1..=5 {
        run_one(&p, Put::new([(2, value)]));
    }
    assert_eq!(p.store().version_count(2), 6);
    assert_eq!(p.latest_value(2), Some(5));
    assert!(p.store().txn_table().is_empty());
}

#[test]
fn test_shuffled_puts_leave_last_committed_value() {
    let p = processor(CcMode::Mvcc, 32);
    let mut keys: Vec<Key> = (0..32).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(7));
    for key in &keys {
        run_one(&p, Put::new([(*key, *key as i64 + 1)]));
    }
    for key in keys {
        assert_eq!(p.latest_value(key), Some(key as i64 + 1));
    }
}
