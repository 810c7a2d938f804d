//! Transaction state machines.

use serde::{Deserialize, Serialize};

/// The aggregate state of a global transaction.
///
/// Saga transitions:
/// ```text
/// Started ──┬──► Committed
///           └──► Compensating ──┬──► Compensated
///                               └──► Suspended (retries exhausted)
/// ```
///
/// TCC transitions:
/// ```text
/// Started ──► Coordinating ──┬──► Committed   (confirm path)
///                            └──► Compensated (cancel path)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GlobalTxState {
    /// Transaction is open and accepting participant events.
    #[default]
    Started,

    /// All participants succeeded (terminal).
    Committed,

    /// A participant failed; compensations are in flight.
    Compensating,

    /// TCC end received; confirm/cancel acks are in flight.
    Coordinating,

    /// Every required compensation (or cancel) acknowledged (terminal).
    Compensated,

    /// Compensation could not complete; awaiting operator attention
    /// (terminal for participant-sourced events).
    Suspended,
}

impl GlobalTxState {
    /// Returns true if the transaction accepts no further events at all.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GlobalTxState::Committed | GlobalTxState::Compensated | GlobalTxState::Suspended
        )
    }

    /// Returns true if participant-sourced lifecycle events are still accepted.
    pub fn accepts_participant_events(&self) -> bool {
        matches!(self, GlobalTxState::Started)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            GlobalTxState::Started => "Started",
            GlobalTxState::Committed => "Committed",
            GlobalTxState::Compensating => "Compensating",
            GlobalTxState::Coordinating => "Coordinating",
            GlobalTxState::Compensated => "Compensated",
            GlobalTxState::Suspended => "Suspended",
        }
    }

    /// Parses a state from its string name.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "Started" => Some(GlobalTxState::Started),
            "Committed" => Some(GlobalTxState::Committed),
            "Compensating" => Some(GlobalTxState::Compensating),
            "Coordinating" => Some(GlobalTxState::Coordinating),
            "Compensated" => Some(GlobalTxState::Compensated),
            "Suspended" => Some(GlobalTxState::Suspended),
            _ => None,
        }
    }
}

impl std::fmt::Display for GlobalTxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of one sub-transaction (saga) or participant (TCC).
///
/// States form a total order via [`TxState::rank`]; an event that would move
/// a sub-transaction to an equal-or-lower rank is a no-op, which absorbs
/// duplicate and out-of-order delivery from the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TxState {
    /// Participant reported start, not yet finished.
    #[default]
    Active,

    /// Participant finished successfully (saga) or Try succeeded (TCC).
    Committed,

    /// Participant aborted; never compensated.
    Failed,

    /// A compensate/confirm/cancel command is in flight, awaiting its ack.
    CompensationSent,

    /// The participant acknowledged a failed compensation; retryable.
    CompensatedFailed,

    /// Compensation (or coordination) acknowledged successfully (terminal).
    CompensatedSucceed,
}

impl TxState {
    /// Position in the forward-only total order.
    ///
    /// `Committed` and `Failed` share a rank: they are alternative outcomes
    /// of `Active`, not successors of each other.
    pub fn rank(&self) -> u8 {
        match self {
            TxState::Active => 0,
            TxState::Committed | TxState::Failed => 1,
            TxState::CompensationSent => 2,
            TxState::CompensatedFailed => 3,
            TxState::CompensatedSucceed => 4,
        }
    }

    /// Returns true if compensation work is outstanding for this
    /// sub-transaction (a command in flight or a retryable failure).
    pub fn compensation_outstanding(&self) -> bool {
        matches!(self, TxState::CompensationSent | TxState::CompensatedFailed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Active => "Active",
            TxState::Committed => "Committed",
            TxState::Failed => "Failed",
            TxState::CompensationSent => "CompensationSent",
            TxState::CompensatedFailed => "CompensatedFailed",
            TxState::CompensatedSucceed => "CompensatedSucceed",
        }
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_terminal_states() {
        assert!(!GlobalTxState::Started.is_terminal());
        assert!(!GlobalTxState::Compensating.is_terminal());
        assert!(!GlobalTxState::Coordinating.is_terminal());
        assert!(GlobalTxState::Committed.is_terminal());
        assert!(GlobalTxState::Compensated.is_terminal());
        assert!(GlobalTxState::Suspended.is_terminal());
    }

    #[test]
    fn only_started_accepts_participant_events() {
        assert!(GlobalTxState::Started.accepts_participant_events());
        assert!(!GlobalTxState::Compensating.accepts_participant_events());
        assert!(!GlobalTxState::Coordinating.accepts_participant_events());
        assert!(!GlobalTxState::Committed.accepts_participant_events());
        assert!(!GlobalTxState::Compensated.accepts_participant_events());
        assert!(!GlobalTxState::Suspended.accepts_participant_events());
    }

    #[test]
    fn global_state_string_roundtrip() {
        for state in [
            GlobalTxState::Started,
            GlobalTxState::Committed,
            GlobalTxState::Compensating,
            GlobalTxState::Coordinating,
            GlobalTxState::Compensated,
            GlobalTxState::Suspended,
        ] {
            assert_eq!(GlobalTxState::parse_str(state.as_str()), Some(state));
        }
        assert_eq!(GlobalTxState::parse_str("NoSuchState"), None);
    }

    #[test]
    fn tx_state_ranks_are_monotone_along_the_happy_and_failure_paths() {
        assert!(TxState::Active.rank() < TxState::Committed.rank());
        assert!(TxState::Committed.rank() < TxState::CompensationSent.rank());
        assert!(TxState::CompensationSent.rank() < TxState::CompensatedFailed.rank());
        assert!(TxState::CompensatedFailed.rank() < TxState::CompensatedSucceed.rank());
        assert_eq!(TxState::Committed.rank(), TxState::Failed.rank());
    }

    #[test]
    fn outstanding_compensation_states() {
        assert!(TxState::CompensationSent.compensation_outstanding());
        assert!(TxState::CompensatedFailed.compensation_outstanding());
        assert!(!TxState::Active.compensation_outstanding());
        assert!(!TxState::Committed.compensation_outstanding());
        assert!(!TxState::Failed.compensation_outstanding());
        assert!(!TxState::CompensatedSucceed.compensation_outstanding());
    }
}
