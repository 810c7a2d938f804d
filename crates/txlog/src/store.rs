use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{GlobalTxId, Result, TxEvent, TxEventQuery};

/// Core trait for transaction log store implementations.
///
/// The log is append-only and is the system of record: the coordinator's
/// per-transaction state machines are derivable from it by replay. Events
/// are never updated; the only delete is whole-transaction housekeeping.
/// All implementations must be thread-safe (Send + Sync) and must support
/// concurrent appends to different global transaction ids.
#[async_trait]
pub trait TxLogStore: Send + Sync {
    /// Durably appends a single event to the log.
    ///
    /// An inbound event must not be acknowledged to its participant until
    /// this call returns Ok.
    async fn append(&self, event: TxEvent) -> Result<()>;

    /// Retrieves all events for a global transaction, in append order.
    async fn events_for(&self, global_tx_id: GlobalTxId) -> Result<Vec<TxEvent>>;

    /// Retrieves events matching a query, in append order.
    async fn query_events(&self, query: TxEventQuery) -> Result<Vec<TxEvent>>;

    /// Returns every global transaction id present in the log, ordered by
    /// first appearance.
    async fn global_tx_ids(&self) -> Result<Vec<GlobalTxId>>;

    /// Returns ids of global transactions with no terminal marker whose
    /// first event was recorded before `before`.
    ///
    /// Used for crash recovery (pass the current time) and housekeeping.
    async fn find_non_terminal(&self, before: DateTime<Utc>) -> Result<Vec<GlobalTxId>>;

    /// Returns ids of global transactions with no terminal marker whose
    /// declared deadline has passed as of `now`.
    ///
    /// Transactions that never declared a timeout are not returned.
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<GlobalTxId>>;

    /// Deletes all events for a global transaction (housekeeping only).
    ///
    /// Returns the number of events removed.
    async fn delete_by_global_tx_id(&self, global_tx_id: GlobalTxId) -> Result<u64>;
}

/// Extension trait providing convenience methods for log stores.
#[async_trait]
pub trait TxLogStoreExt: TxLogStore {
    /// Checks whether any events exist for a global transaction.
    async fn global_tx_exists(&self, global_tx_id: GlobalTxId) -> Result<bool> {
        Ok(!self.events_for(global_tx_id).await?.is_empty())
    }

    /// Checks whether a global transaction has reached a terminal marker.
    async fn is_terminal(&self, global_tx_id: GlobalTxId) -> Result<bool> {
        let events = self.events_for(global_tx_id).await?;
        Ok(events.iter().any(|e| e.event_type.is_terminal_marker()))
    }
}

// Blanket implementation for all TxLogStore implementations
impl<T: TxLogStore + ?Sized> TxLogStoreExt for T {}
