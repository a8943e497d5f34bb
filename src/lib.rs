//! txnflow - in-memory transactional key-value engine
//!
//! txnflow runs transactions over a bounded integer key space under one of
//! eight interchangeable concurrency-control modes: serial execution, two
//! flavours of two-phase locking, serial and parallel OCC, MVCC, snapshot
//! isolation and constrained snapshot isolation.
//!
//! # Quick Start
//!
//! ```ignore
//! use txnflow::{CcMode, EngineConfig, Put, Transaction, TxnProcessor};
//!
//! let processor = TxnProcessor::new(EngineConfig::for_mode(CcMode::SnapshotIsolation))?;
//! processor.submit(Transaction::new(Put::new([(1, 2)])))?;
//! let done = processor.await_result()?;
//! assert!(done.status().is_terminal());
//! ```
//!
//! # Architecture
//!
//! Transactions are written as [`TxnBody`] implementations declaring their
//! read and write sets up front. The [`TxnProcessor`] retries attempts that
//! lose a concurrency conflict, so clients only ever see `Committed` or an
//! abort decided by the body itself.

pub use txnflow_concurrency::{
    ConstraintView, ExclusiveLockManager, LockManager, LockMode, SharedLockManager, Transaction,
    TxnBody, TxnContext,
};
pub use txnflow_core::{
    CcMode, Conflict, EngineConfig, Error, Key, Result, Timestamp, TxnId, TxnStatus, Value,
    CONFIG_FILE_NAME, INFINITY, NO_TXN,
};
pub use txnflow_engine::{
    Expect, Noop, ProcessorStats, Put, Rmw, TxnProcessor, WriteCheck,
};
pub use txnflow_storage::{ReadVersion, Version, VersionStore};
