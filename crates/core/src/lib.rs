//! Core types for txnflow
//!
//! This crate defines the foundational types used throughout the system:
//! - Key, Value, Timestamp, TxnId: identifiers of the key space and clock
//! - TxnStatus: transaction status state machine
//! - CcMode, EngineConfig: processor configuration
//! - Error, Conflict: error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod status;
pub mod types;

pub use config::{CcMode, EngineConfig, CONFIG_FILE_NAME};
pub use error::{Conflict, Error, Result};
pub use status::TxnStatus;
pub use types::{Key, Timestamp, TxnId, Value, INFINITY, NO_TXN};
