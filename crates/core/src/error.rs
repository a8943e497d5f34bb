//! Error types for txnflow
//!
//! `Error` covers failures that reach a caller. `Conflict` describes why a
//! concurrency-control check rejected an attempt; conflicts are resolved by
//! restarting the attempt and never cross the processor boundary.

use crate::status::TxnStatus;
use crate::types::{Key, Timestamp, TxnId};
use thiserror::Error;

/// Result type alias for txnflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers
#[derive(Debug, Error)]
pub enum Error {
    /// Illegal status transition
    #[error("transaction {id}: illegal status transition {from} -> {to}")]
    InvalidTransition {
        /// Transaction id
        id: TxnId,
        /// Current status
        from: TxnStatus,
        /// Requested status
        to: TxnStatus,
    },

    /// Key outside the initialized key space
    #[error("key {0} is outside the key space")]
    UnknownKey(Key),

    /// The processor was shut down
    #[error("transaction processor has shut down")]
    ShutDown,

    /// A worker panicked while executing a transaction body
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// A processor thread could not be started
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Reason a concurrency-control check rejected an attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    /// A lock request blocked while others were already held
    #[error("lock on key {key} unavailable")]
    LockUnavailable {
        /// Contended key
        key: Key,
    },

    /// The key was rewritten after the attempt read it
    #[error("stale read on key {key}: read {read_at:?}, now {current:?}")]
    StaleRead {
        /// Key that changed
        key: Key,
        /// Version stamp observed by the read phase
        read_at: Option<Timestamp>,
        /// Version stamp at validation time
        current: Option<Timestamp>,
    },

    /// Read/write sets intersect those of a concurrent validator
    #[error("read/write sets overlap concurrent validator {other}")]
    ConcurrentValidator {
        /// The overlapping transaction
        other: TxnId,
    },

    /// Write intent on the key is held by another writer, or a newer version exists
    #[error("write intent on key {key} held elsewhere")]
    WriteIntent {
        /// Contended key
        key: Key,
    },

    /// Commit-time invariant check failed
    #[error("commit-time validation failed")]
    ConstraintViolated,
}
