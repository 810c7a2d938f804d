use common::GlobalTxId;
use thiserror::Error;

/// Errors that can occur when interacting with the transaction log store.
#[derive(Debug, Error)]
pub enum TxLogError {
    /// No events exist for the requested global transaction.
    #[error("Global transaction not found: {0}")]
    GlobalTxNotFound(GlobalTxId),

    /// The event is missing a field the store requires.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for transaction log operations.
pub type Result<T> = std::result::Result<T, TxLogError>;
