//! Concurrency layer for txnflow
//!
//! This crate implements the per-transaction side of concurrency control:
//! - Transaction: descriptor, status machine, buffered reads and writes
//! - TxnBody: application logic contract
//! - LockManager: exclusive-only and shared/exclusive lock queues
//! - Validation: OCC backward validation and the parallel active set

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod transaction;
pub mod validation;

pub use lock::{ExclusiveLockManager, LockManager, LockMode, Owners, SharedLockManager};
pub use transaction::{ConstraintView, Transaction, TxnBody, TxnContext};
pub use validation::{
    validate_against_active, validate_read_versions, ActiveSet, Footprint, ValidationResult,
};
