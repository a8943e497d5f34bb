//! Processor configuration via `txnflow.toml`
//!
//! Every field has a default, so an empty document is a valid config.

use crate::error::{Error, Result};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Concurrency-control protocol, selected once at processor construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CcMode {
    /// One transaction at a time on the scheduler thread
    Serial,
    /// Two-phase locking, every lock exclusive
    ExclusiveLocking,
    /// Two-phase locking with shared read locks
    SharedLocking,
    /// Optimistic execution, validation on the scheduler thread
    Occ,
    /// Optimistic execution, validation on the workers
    ParallelOcc,
    /// Timestamp-ordered multi-version, first committer wins
    Mvcc,
    /// Snapshot isolation
    SnapshotIsolation,
    /// Snapshot isolation with a commit-time invariant check
    ConstrainedSnapshotIsolation,
}

impl CcMode {
    /// Every mode, in declaration order.
    pub const ALL: [CcMode; 8] = [
        CcMode::Serial,
        CcMode::ExclusiveLocking,
        CcMode::SharedLocking,
        CcMode::Occ,
        CcMode::ParallelOcc,
        CcMode::Mvcc,
        CcMode::SnapshotIsolation,
        CcMode::ConstrainedSnapshotIsolation,
    ];

    /// Kebab-case name used in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            CcMode::Serial => "serial",
            CcMode::ExclusiveLocking => "exclusive-locking",
            CcMode::SharedLocking => "shared-locking",
            CcMode::Occ => "occ",
            CcMode::ParallelOcc => "parallel-occ",
            CcMode::Mvcc => "mvcc",
            CcMode::SnapshotIsolation => "snapshot-isolation",
            CcMode::ConstrainedSnapshotIsolation => "constrained-snapshot-isolation",
        }
    }

    /// Whether the mode admits transactions through the lock manager.
    pub fn is_locking(self) -> bool {
        matches!(self, CcMode::ExclusiveLocking | CcMode::SharedLocking)
    }

    /// Whether the mode reads through speculative version boundaries.
    pub fn is_snapshot(self) -> bool {
        matches!(
            self,
            CcMode::SnapshotIsolation | CcMode::ConstrainedSnapshotIsolation
        )
    }
}

impl fmt::Display for CcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CcMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CcMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown concurrency mode '{}'", s)))
    }
}

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "txnflow.toml";

/// Processor configuration.
///
/// # Example
///
/// ```toml
/// mode = "snapshot-isolation"
/// worker_threads = 8
/// key_space = 1000000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrency-control protocol.
    #[serde(default = "default_mode")]
    pub mode: CcMode,
    /// Size of the worker pool.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Keys `[0, key_space)` are populated at startup.
    #[serde(default = "default_key_space")]
    pub key_space: u64,
    /// Value every key starts with.
    #[serde(default)]
    pub initial_value: Value,
    /// How long the scheduler thread waits for new requests when idle.
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
}

fn default_mode() -> CcMode {
    CcMode::Serial
}

fn default_worker_threads() -> usize {
    8
}

fn default_key_space() -> u64 {
    1_000_000
}

fn default_poll_interval_us() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            worker_threads: default_worker_threads(),
            key_space: default_key_space(),
            initial_value: 0,
            poll_interval_us: default_poll_interval_us(),
        }
    }
}

impl EngineConfig {
    /// Default config for `mode`.
    pub fn for_mode(mode: CcMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Set the concurrency mode.
    pub fn with_mode(mut self, mode: CcMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the worker pool size.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the key space size.
    pub fn with_key_space(mut self, keys: u64) -> Self {
        self.key_space = keys;
        self
    }

    /// Set the value keys start with.
    pub fn with_initial_value(mut self, value: Value) -> Self {
        self.initial_value = value;
        self
    }

    /// Idle wait of the scheduler thread.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// Reject configurations the processor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_us == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_us must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# txnflow processor configuration
#
# Concurrency mode, one of:
#   "serial", "exclusive-locking", "shared-locking", "occ", "parallel-occ",
#   "mvcc", "snapshot-isolation", "constrained-snapshot-isolation"
mode = "serial"

# Worker pool size (default: 8)
worker_threads = 8

# Keys [0, key_space) exist from startup (default: 1000000)
key_space = 1000000

# Value every key starts with (default: 0)
initial_value = 0

# Idle wait of the scheduler thread in microseconds (default: 100)
poll_interval_us = 100
"#
    }
}
