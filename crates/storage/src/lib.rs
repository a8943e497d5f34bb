//! Storage layer for txnflow
//!
//! This crate implements the in-memory multi-version store:
//! - VersionStore: per-key version chains with interval visibility
//! - Version / Boundary: validity intervals with speculative boundaries
//! - TxnTable: id-keyed records used to resolve speculative boundaries
//!
//! Superseded versions are never reclaimed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod store;
pub mod txn_table;
pub mod version;

pub use store::{KeyLatch, ReadVersion, VersionStore};
pub use txn_table::{TxnRecord, TxnTable};
pub use version::{Boundary, Version};
