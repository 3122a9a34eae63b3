//! Saga phase machine.

use serde::{Deserialize, Serialize};

/// The phase of a saga record in the correlation table.
///
/// Phase transitions:
/// ```text
/// Locating ──► Located ──► Settling ──► Done
///     │            │            │
///     └─ removed   └─ removed   └─ removed
///   (timeout,     (disconnect,  (failure)
///    cancel)       ttl sweep)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaPhase {
    /// Oracles notified, waiting for the first answer.
    #[default]
    Locating,

    /// Location resolved; waiting for the client's signed approval.
    Located,

    /// Approval and transfer are being submitted to the ledger.
    Settling,

    /// Transfer confirmed (terminal state).
    Done,
}

impl SagaPhase {
    /// Returns true if the record can be claimed by phase 2.
    pub fn can_settle(&self) -> bool {
        matches!(self, SagaPhase::Located)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaPhase::Done)
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaPhase::Locating => "locating",
            SagaPhase::Located => "located",
            SagaPhase::Settling => "settling",
            SagaPhase::Done => "done",
        }
    }
}

impl std::fmt::Display for SagaPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
