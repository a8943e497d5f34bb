//! Transaction processing engine for txnflow
//!
//! This crate drives transactions through the lower layers:
//! - TxnProcessor: submission, scheduling, retry and result delivery
//! - Protocols: one per concurrency mode
//! - WorkerPool: fixed-size pool running read phases and bodies
//! - Clock: the single source of ids and timestamps
//! - Reference transaction bodies
//!
//! The engine is the only component that knows about:
//! - Concurrency modes
//! - Restarting attempts that lost a conflict

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bodies;
pub mod clock;
pub mod pool;
pub mod processor;
mod protocol;
pub mod queue;
pub mod stats;

pub use bodies::{Expect, Noop, Put, Rmw, WriteCheck};
pub use clock::Clock;
pub use pool::{PoolStats, WorkerPool};
pub use processor::TxnProcessor;
pub use queue::TxnQueue;
pub use stats::ProcessorStats;
