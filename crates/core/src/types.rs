//! Primitive identifiers shared by every layer.
//!
//! Keys index a bounded, dense key space `[0, N)` that is populated once at
//! startup. Transaction ids and timestamps are drawn from one monotonic
//! clock, so an attempt's id doubles as its begin timestamp.

/// Identifier of a key in the store's key space.
pub type Key = u64;

/// Value stored under a key.
pub type Value = i64;

/// Logical timestamp handed out by the processor clock.
pub type Timestamp = u64;

/// Transaction identifier.
pub type TxnId = u64;

/// Open end boundary. No reader timestamp ever reaches it.
pub const INFINITY: Timestamp = u64::MAX;

/// Reserved id meaning "no transaction". The clock never hands it out.
pub const NO_TXN: TxnId = 0;
