use chrono::{DateTime, Utc};
use common::GlobalTxId;

use crate::EventType;

/// Builder for filtered reads over the transaction log.
///
/// Used by the audit/dashboard path; the consistency-critical path only
/// ever reads whole transactions via `events_for`.
#[derive(Debug, Clone, Default)]
pub struct TxEventQuery {
    /// Filter by global transaction ID.
    pub global_tx_id: Option<GlobalTxId>,

    /// Filter by event types (any of these types).
    pub event_types: Option<Vec<EventType>>,

    /// Filter by reporting service name.
    pub service_name: Option<String>,

    /// Filter by events at or after this timestamp.
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Filter by events at or before this timestamp.
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of events to skip.
    pub offset: Option<usize>,
}

impl TxEventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific global transaction.
    pub fn for_global_tx(global_tx_id: GlobalTxId) -> Self {
        Self {
            global_tx_id: Some(global_tx_id),
            ..Default::default()
        }
    }

    /// Filters by global transaction ID.
    pub fn global_tx_id(mut self, id: GlobalTxId) -> Self {
        self.global_tx_id = Some(id);
        self
    }

    /// Filters by a single event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_types = Some(vec![event_type]);
        self
    }

    /// Filters by multiple event types (any of these).
    pub fn event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// Filters by reporting service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Filters to events at or after this timestamp.
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Filters to events at or before this timestamp.
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of events returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many events before returning results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the event passes every filter in this query,
    /// ignoring limit/offset.
    pub fn matches(&self, event: &crate::TxEvent) -> bool {
        if let Some(id) = self.global_tx_id
            && event.global_tx_id != id
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if let Some(ref service) = self.service_name
            && &event.service_name != service
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && event.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && event.timestamp > to
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxEvent;

    #[test]
    fn query_for_global_tx() {
        let id = GlobalTxId::new();
        let query = TxEventQuery::for_global_tx(id);

        assert_eq!(query.global_tx_id, Some(id));
        assert!(query.event_types.is_none());
    }

    #[test]
    fn query_builder_chain() {
        let id = GlobalTxId::new();
        let query = TxEventQuery::new()
            .global_tx_id(id)
            .event_type(EventType::TxAborted)
            .service_name("payment")
            .limit(100)
            .offset(10);

        assert_eq!(query.global_tx_id, Some(id));
        assert_eq!(query.event_types, Some(vec![EventType::TxAborted]));
        assert_eq!(query.service_name.as_deref(), Some("payment"));
        assert_eq!(query.limit, Some(100));
        assert_eq!(query.offset, Some(10));
    }

    #[test]
    fn matches_filters_by_type_and_service() {
        let id = GlobalTxId::new();
        let event = TxEvent::builder()
            .event_type(EventType::TxStarted)
            .global_tx_id(id)
            .service_name("payment")
            .build();

        assert!(TxEventQuery::for_global_tx(id).matches(&event));
        assert!(
            TxEventQuery::new()
                .event_type(EventType::TxStarted)
                .matches(&event)
        );
        assert!(
            !TxEventQuery::new()
                .event_type(EventType::TxEnded)
                .matches(&event)
        );
        assert!(!TxEventQuery::new().service_name("shipping").matches(&event));
        assert!(!TxEventQuery::for_global_tx(GlobalTxId::new()).matches(&event));
    }
}
