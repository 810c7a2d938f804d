//! Coordinator error types.

use common::GlobalTxId;
use thiserror::Error;
use txlog::TxLogError;

use crate::state::GlobalTxState;

/// Errors that can occur while coordinating transactions.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The event is structurally invalid (e.g. missing a required field).
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// A non-start event arrived for a global transaction the coordinator
    /// has never seen.
    #[error("Unknown global transaction: {0}")]
    UnknownGlobalTx(GlobalTxId),

    /// The global transaction is terminal and accepts no further events.
    #[error("Global transaction {global_tx_id} is terminal ({state})")]
    TerminalState {
        global_tx_id: GlobalTxId,
        state: GlobalTxState,
    },

    /// No instance of the participant service is currently connected.
    #[error("No callback available for service '{service}'")]
    NoCallbackAvailable { service: String },

    /// The participant's command channel closed mid-send.
    #[error("Command channel closed for service '{service}'")]
    ChannelClosed { service: String },

    /// Transaction log error.
    #[error("Transaction log error: {0}")]
    TxLog(#[from] TxLogError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
