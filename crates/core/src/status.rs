//! Transaction status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one transaction attempt.
///
/// State transitions:
/// - `Incomplete` → `Active` (admitted, reads may start)
/// - `Active` → `CompletedCommit` | `CompletedAbort` (body finished and decided)
/// - `CompletedCommit` → `Committed` (validation passed, writes visible)
/// - `CompletedAbort` → `Aborted` (application abort, terminal)
/// - `Active` | `CompletedCommit` → `Aborted` (concurrency abort of this attempt)
///
/// A concurrency abort never reaches the client: the retry starts over from
/// `Incomplete` under a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxnStatus {
    /// Created, not yet admitted
    Incomplete = 0,
    /// Admitted and executing
    Active = 1,
    /// Body finished and wants to commit
    CompletedCommit = 2,
    /// Body finished and decided to abort
    CompletedAbort = 3,
    /// Writes applied
    Committed = 4,
    /// Attempt discarded
    Aborted = 5,
}

impl TxnStatus {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TxnStatus) -> bool {
        use TxnStatus::*;
        matches!(
            (self, next),
            (Incomplete, Active)
                | (Active, CompletedCommit)
                | (Active, CompletedAbort)
                | (Active, Aborted)
                | (CompletedCommit, Committed)
                | (CompletedCommit, Aborted)
                | (CompletedAbort, Aborted)
        )
    }

    /// `Committed` or `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::Aborted)
    }

    /// Encoding used by atomic status cells.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`TxnStatus::as_u8`]. Unknown encodings map to `None`.
    pub fn from_u8(raw: u8) -> Option<TxnStatus> {
        match raw {
            0 => Some(TxnStatus::Incomplete),
            1 => Some(TxnStatus::Active),
            2 => Some(TxnStatus::CompletedCommit),
            3 => Some(TxnStatus::CompletedAbort),
            4 => Some(TxnStatus::Committed),
            5 => Some(TxnStatus::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnStatus::Incomplete => "incomplete",
            TxnStatus::Active => "active",
            TxnStatus::CompletedCommit => "completed-commit",
            TxnStatus::CompletedAbort => "completed-abort",
            TxnStatus::Committed => "committed",
            TxnStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
