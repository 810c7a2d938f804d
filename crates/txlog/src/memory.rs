use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{GlobalTxId, Result, TxEvent, TxEventQuery, store::TxLogStore};

/// In-memory transaction log store.
///
/// Stores all events in append order and provides the same interface as
/// the PostgreSQL implementation. Used in tests and single-node demos.
#[derive(Clone, Default)]
pub struct InMemoryTxLogStore {
    events: Arc<RwLock<Vec<TxEvent>>>,
}

impl InMemoryTxLogStore {
    /// Creates a new empty in-memory log store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    fn is_terminal_in(events: &[TxEvent], global_tx_id: GlobalTxId) -> bool {
        events
            .iter()
            .any(|e| e.global_tx_id == global_tx_id && e.event_type.is_terminal_marker())
    }
}

#[async_trait]
impl TxLogStore for InMemoryTxLogStore {
    async fn append(&self, event: TxEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.push(event);
        metrics::counter!("txlog_events_appended_total").increment(1);
        Ok(())
    }

    async fn events_for(&self, global_tx_id: GlobalTxId) -> Result<Vec<TxEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.global_tx_id == global_tx_id)
            .cloned()
            .collect())
    }

    async fn query_events(&self, query: TxEventQuery) -> Result<Vec<TxEvent>> {
        let events = self.events.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(events
            .iter()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn global_tx_ids(&self) -> Result<Vec<GlobalTxId>> {
        let events = self.events.read().await;
        let mut ids = Vec::new();
        for event in events.iter() {
            if !ids.contains(&event.global_tx_id) {
                ids.push(event.global_tx_id);
            }
        }
        Ok(ids)
    }

    async fn find_non_terminal(&self, before: DateTime<Utc>) -> Result<Vec<GlobalTxId>> {
        let events = self.events.read().await;
        let mut ids = Vec::new();
        for event in events.iter() {
            if ids.contains(&event.global_tx_id) {
                continue;
            }
            // First unseen occurrence is the transaction's first event.
            let earlier = events
                .iter()
                .find(|e| e.global_tx_id == event.global_tx_id)
                .is_some_and(|e| e.timestamp < before);
            if earlier && !Self::is_terminal_in(&events, event.global_tx_id) {
                ids.push(event.global_tx_id);
            }
        }
        Ok(ids)
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<GlobalTxId>> {
        let events = self.events.read().await;
        let mut ids = Vec::new();
        for event in events.iter() {
            if ids.contains(&event.global_tx_id) {
                continue;
            }
            let expired = matches!(event.deadline(), Some(deadline) if deadline <= now);
            if expired && !Self::is_terminal_in(&events, event.global_tx_id) {
                ids.push(event.global_tx_id);
            }
        }
        Ok(ids)
    }

    async fn delete_by_global_tx_id(&self, global_tx_id: GlobalTxId) -> Result<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.global_tx_id != global_tx_id);
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventType, store::TxLogStoreExt};
    use chrono::Duration;

    fn event(global_tx_id: GlobalTxId, event_type: EventType) -> TxEvent {
        TxEvent::builder()
            .event_type(event_type)
            .global_tx_id(global_tx_id)
            .service_name("test-service")
            .instance_id("test-1")
            .build()
    }

    #[tokio::test]
    async fn append_and_read_back_in_order() {
        let store = InMemoryTxLogStore::new();
        let id = GlobalTxId::new();

        store.append(event(id, EventType::SagaStarted)).await.unwrap();
        store.append(event(id, EventType::TxStarted)).await.unwrap();
        store.append(event(id, EventType::TxEnded)).await.unwrap();
        store
            .append(event(GlobalTxId::new(), EventType::SagaStarted))
            .await
            .unwrap();

        let events = store.events_for(id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::SagaStarted);
        assert_eq!(events[1].event_type, EventType::TxStarted);
        assert_eq!(events[2].event_type, EventType::TxEnded);
    }

    #[tokio::test]
    async fn global_tx_ids_ordered_by_first_appearance() {
        let store = InMemoryTxLogStore::new();
        let id1 = GlobalTxId::new();
        let id2 = GlobalTxId::new();

        store.append(event(id1, EventType::SagaStarted)).await.unwrap();
        store.append(event(id2, EventType::SagaStarted)).await.unwrap();
        store.append(event(id1, EventType::TxStarted)).await.unwrap();

        assert_eq!(store.global_tx_ids().await.unwrap(), vec![id1, id2]);
    }

    #[tokio::test]
    async fn find_non_terminal_excludes_marked_transactions() {
        let store = InMemoryTxLogStore::new();
        let open = GlobalTxId::new();
        let done = GlobalTxId::new();
        let suspended = GlobalTxId::new();

        store.append(event(open, EventType::SagaStarted)).await.unwrap();
        store.append(event(done, EventType::SagaStarted)).await.unwrap();
        store.append(event(done, EventType::SagaEnded)).await.unwrap();
        store
            .append(event(suspended, EventType::SagaStarted))
            .await
            .unwrap();
        store
            .append(event(suspended, EventType::SagaSuspended))
            .await
            .unwrap();

        let found = store
            .find_non_terminal(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(found, vec![open]);
    }

    #[tokio::test]
    async fn find_expired_honors_declared_timeout() {
        let store = InMemoryTxLogStore::new();
        let with_timeout = GlobalTxId::new();
        let without_timeout = GlobalTxId::new();

        let started = TxEvent::builder()
            .event_type(EventType::SagaStarted)
            .global_tx_id(with_timeout)
            .timeout_secs(1)
            .timestamp(Utc::now() - Duration::seconds(5))
            .build();
        store.append(started).await.unwrap();
        store
            .append(event(without_timeout, EventType::SagaStarted))
            .await
            .unwrap();

        let expired = store.find_expired(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![with_timeout]);

        // Marking it terminal removes it from the sweep.
        store
            .append(event(with_timeout, EventType::SagaSuspended))
            .await
            .unwrap();
        assert!(store.find_expired(Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_with_filters_and_paging() {
        let store = InMemoryTxLogStore::new();
        let id = GlobalTxId::new();

        for event_type in [
            EventType::SagaStarted,
            EventType::TxStarted,
            EventType::TxEnded,
            EventType::SagaEnded,
        ] {
            store.append(event(id, event_type)).await.unwrap();
        }

        let started_only = store
            .query_events(TxEventQuery::new().event_type(EventType::TxStarted))
            .await
            .unwrap();
        assert_eq!(started_only.len(), 1);

        let page = store
            .query_events(TxEventQuery::for_global_tx(id).offset(1).limit(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].event_type, EventType::TxStarted);
        assert_eq!(page[1].event_type, EventType::TxEnded);
    }

    #[tokio::test]
    async fn delete_by_global_tx_id_removes_all_events() {
        let store = InMemoryTxLogStore::new();
        let id = GlobalTxId::new();
        let other = GlobalTxId::new();

        store.append(event(id, EventType::SagaStarted)).await.unwrap();
        store.append(event(id, EventType::SagaEnded)).await.unwrap();
        store.append(event(other, EventType::SagaStarted)).await.unwrap();

        let removed = store.delete_by_global_tx_id(id).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.event_count().await, 1);
        assert!(!store.global_tx_exists(id).await.unwrap());
    }
}
