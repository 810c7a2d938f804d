//! Shared identifier types used across the coordinator workspace.

pub mod types;

pub use types::{GlobalTxId, LocalTxId};
