use chrono::{DateTime, Duration, Utc};
use common::{GlobalTxId, LocalTxId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of fact recorded in the transaction log.
///
/// Participant-reported events cover the saga lifecycle (`SagaStarted` through
/// `SagaEnded`) and the TCC lifecycle (`TccStarted` through `Coordinated`).
/// `SagaTimedOut` is synthesized by the timeout scanner; `SagaSuspended` is a
/// coordinator-appended terminal marker; `CompensationSent` and
/// `CoordinationSent` are dispatcher audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SagaStarted,
    TxStarted,
    TxEnded,
    TxAborted,
    TxCompensated,
    SagaEnded,
    SagaTimedOut,
    SagaSuspended,
    CompensationSent,
    CoordinationSent,
    ParticipationStarted,
    ParticipationEnded,
    TccStarted,
    TccEnded,
    Coordinated,
}

impl EventType {
    /// Returns the event type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SagaStarted => "SagaStarted",
            EventType::TxStarted => "TxStarted",
            EventType::TxEnded => "TxEnded",
            EventType::TxAborted => "TxAborted",
            EventType::TxCompensated => "TxCompensated",
            EventType::SagaEnded => "SagaEnded",
            EventType::SagaTimedOut => "SagaTimedOut",
            EventType::SagaSuspended => "SagaSuspended",
            EventType::CompensationSent => "CompensationSent",
            EventType::CoordinationSent => "CoordinationSent",
            EventType::ParticipationStarted => "ParticipationStarted",
            EventType::ParticipationEnded => "ParticipationEnded",
            EventType::TccStarted => "TccStarted",
            EventType::TccEnded => "TccEnded",
            EventType::Coordinated => "Coordinated",
        }
    }

    /// Parses an event type from its string name.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "SagaStarted" => Some(EventType::SagaStarted),
            "TxStarted" => Some(EventType::TxStarted),
            "TxEnded" => Some(EventType::TxEnded),
            "TxAborted" => Some(EventType::TxAborted),
            "TxCompensated" => Some(EventType::TxCompensated),
            "SagaEnded" => Some(EventType::SagaEnded),
            "SagaTimedOut" => Some(EventType::SagaTimedOut),
            "SagaSuspended" => Some(EventType::SagaSuspended),
            "CompensationSent" => Some(EventType::CompensationSent),
            "CoordinationSent" => Some(EventType::CoordinationSent),
            "ParticipationStarted" => Some(EventType::ParticipationStarted),
            "ParticipationEnded" => Some(EventType::ParticipationEnded),
            "TccStarted" => Some(EventType::TccStarted),
            "TccEnded" => Some(EventType::TccEnded),
            "Coordinated" => Some(EventType::Coordinated),
            _ => None,
        }
    }

    /// Returns true if this event type marks a global transaction as
    /// finished in the log (no further coordinator action required).
    pub fn is_terminal_marker(&self) -> bool {
        matches!(self, EventType::SagaEnded | EventType::SagaSuspended)
    }

    /// Returns true if this event type opens a new global transaction.
    pub fn is_start(&self) -> bool {
        matches!(self, EventType::SagaStarted | EventType::TccStarted)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome reported by a participant in `ParticipationEnded`, `TccEnded`,
/// and `TxCompensated` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Succeed,
    Failed,
}

impl TxStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Succeed => "Succeed",
            TxStatus::Failed => "Failed",
        }
    }

    /// Parses a status from its string name.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "Succeed" => Some(TxStatus::Succeed),
            "Failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable fact reported by a participant (or synthesized by the
/// coordinator) about a global transaction.
///
/// The log is the system of record: coordinator state is derivable from the
/// ordered sequence of `TxEvent`s for a global transaction id. Events are
/// write-once; the store never updates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The kind of fact recorded.
    pub event_type: EventType,

    /// The global transaction this event belongs to.
    pub global_tx_id: GlobalTxId,

    /// The sub-transaction this event concerns, if any.
    pub local_tx_id: Option<LocalTxId>,

    /// The logical parent of the sub-transaction within the saga, if any.
    /// Carried for audit; compensation ordering uses insertion order.
    pub parent_tx_id: Option<LocalTxId>,

    /// The reporting participant's service name.
    pub service_name: String,

    /// The reporting participant's instance id.
    pub instance_id: String,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,

    /// Opaque participant payload: compensation arguments, or an error
    /// trace when aborting.
    pub payload: Vec<u8>,

    /// Saga: the participant-side compensation method identifier.
    pub compensation_method: Option<String>,

    /// TCC: the participant-side confirm method identifier.
    pub confirm_method: Option<String>,

    /// TCC: the participant-side cancel method identifier.
    pub cancel_method: Option<String>,

    /// Saga start only: seconds until the transaction expires. `None`
    /// disables the timeout scanner for this transaction.
    pub timeout_secs: Option<u64>,

    /// Compensation retry budget requested by the participant.
    /// Zero or negative means "use the coordinator default".
    pub retries: i32,

    /// Participant-reported outcome, where the event type carries one.
    pub status: Option<TxStatus>,
}

impl TxEvent {
    /// Creates a new event builder.
    pub fn builder() -> TxEventBuilder {
        TxEventBuilder::default()
    }

    /// Returns the deadline this event establishes, if it is a start event
    /// carrying a timeout.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if !self.event_type.is_start() {
            return None;
        }
        self.timeout_secs
            .map(|secs| self.timestamp + Duration::seconds(secs as i64))
    }
}

/// Builder for constructing transaction events.
#[derive(Debug, Default)]
pub struct TxEventBuilder {
    event_id: Option<EventId>,
    event_type: Option<EventType>,
    global_tx_id: Option<GlobalTxId>,
    local_tx_id: Option<LocalTxId>,
    parent_tx_id: Option<LocalTxId>,
    service_name: Option<String>,
    instance_id: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    payload: Vec<u8>,
    compensation_method: Option<String>,
    confirm_method: Option<String>,
    cancel_method: Option<String>,
    timeout_secs: Option<u64>,
    retries: i32,
    status: Option<TxStatus>,
}

impl TxEventBuilder {
    /// Sets the event ID. If not set, a new ID is generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Sets the global transaction ID.
    pub fn global_tx_id(mut self, id: GlobalTxId) -> Self {
        self.global_tx_id = Some(id);
        self
    }

    /// Sets the local (sub-transaction) ID.
    pub fn local_tx_id(mut self, id: LocalTxId) -> Self {
        self.local_tx_id = Some(id);
        self
    }

    /// Sets the parent sub-transaction ID.
    pub fn parent_tx_id(mut self, id: LocalTxId) -> Self {
        self.parent_tx_id = Some(id);
        self
    }

    /// Sets the reporting service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Sets the reporting instance ID.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Sets the timestamp. If not set, the current time is used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the opaque payload bytes.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the compensation method identifier.
    pub fn compensation_method(mut self, method: impl Into<String>) -> Self {
        self.compensation_method = Some(method.into());
        self
    }

    /// Sets the TCC confirm method identifier.
    pub fn confirm_method(mut self, method: impl Into<String>) -> Self {
        self.confirm_method = Some(method.into());
        self
    }

    /// Sets the TCC cancel method identifier.
    pub fn cancel_method(mut self, method: impl Into<String>) -> Self {
        self.cancel_method = Some(method.into());
        self
    }

    /// Sets the transaction timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the compensation retry budget.
    pub fn retries(mut self, retries: i32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the participant-reported status.
    pub fn status(mut self, status: TxStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if `event_type` or `global_tx_id` are not set.
    pub fn build(self) -> TxEvent {
        TxEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            global_tx_id: self.global_tx_id.expect("global_tx_id is required"),
            local_tx_id: self.local_tx_id,
            parent_tx_id: self.parent_tx_id,
            service_name: self.service_name.unwrap_or_default(),
            instance_id: self.instance_id.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload,
            compensation_method: self.compensation_method,
            confirm_method: self.confirm_method,
            cancel_method: self.cancel_method,
            timeout_secs: self.timeout_secs,
            retries: self.retries,
            status: self.status,
        }
    }

    /// Tries to build the event, returning None if required fields are missing.
    pub fn try_build(self) -> Option<TxEvent> {
        let event_type = self.event_type?;
        let global_tx_id = self.global_tx_id?;
        Some(TxEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type,
            global_tx_id,
            local_tx_id: self.local_tx_id,
            parent_tx_id: self.parent_tx_id,
            service_name: self.service_name.unwrap_or_default(),
            instance_id: self.instance_id.unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload,
            compensation_method: self.compensation_method,
            confirm_method: self.confirm_method,
            cancel_method: self.cancel_method,
            timeout_secs: self.timeout_secs,
            retries: self.retries,
            status: self.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn event_type_string_roundtrip() {
        let all = [
            EventType::SagaStarted,
            EventType::TxStarted,
            EventType::TxEnded,
            EventType::TxAborted,
            EventType::TxCompensated,
            EventType::SagaEnded,
            EventType::SagaTimedOut,
            EventType::SagaSuspended,
            EventType::CompensationSent,
            EventType::CoordinationSent,
            EventType::ParticipationStarted,
            EventType::ParticipationEnded,
            EventType::TccStarted,
            EventType::TccEnded,
            EventType::Coordinated,
        ];
        for event_type in all {
            assert_eq!(EventType::parse_str(event_type.as_str()), Some(event_type));
        }
        assert_eq!(EventType::parse_str("NoSuchEvent"), None);
    }

    #[test]
    fn terminal_markers() {
        assert!(EventType::SagaEnded.is_terminal_marker());
        assert!(EventType::SagaSuspended.is_terminal_marker());
        assert!(!EventType::TxAborted.is_terminal_marker());
        assert!(!EventType::TxCompensated.is_terminal_marker());
    }

    #[test]
    fn event_builder() {
        let global_tx_id = GlobalTxId::new();
        let local_tx_id = LocalTxId::new();

        let event = TxEvent::builder()
            .event_type(EventType::TxStarted)
            .global_tx_id(global_tx_id)
            .local_tx_id(local_tx_id)
            .service_name("payment")
            .instance_id("payment-1")
            .compensation_method("refund")
            .payload(b"order=42".to_vec())
            .retries(3)
            .build();

        assert_eq!(event.event_type, EventType::TxStarted);
        assert_eq!(event.global_tx_id, global_tx_id);
        assert_eq!(event.local_tx_id, Some(local_tx_id));
        assert_eq!(event.service_name, "payment");
        assert_eq!(event.compensation_method.as_deref(), Some("refund"));
        assert_eq!(event.payload, b"order=42");
        assert_eq!(event.retries, 3);
    }

    #[test]
    fn builder_try_build_returns_none_on_missing_fields() {
        assert!(TxEvent::builder().try_build().is_none());
        assert!(
            TxEvent::builder()
                .event_type(EventType::SagaStarted)
                .try_build()
                .is_none()
        );
    }

    #[test]
    fn deadline_only_on_start_events_with_timeout() {
        let global_tx_id = GlobalTxId::new();

        let started = TxEvent::builder()
            .event_type(EventType::SagaStarted)
            .global_tx_id(global_tx_id)
            .timeout_secs(60)
            .build();
        assert_eq!(
            started.deadline(),
            Some(started.timestamp + Duration::seconds(60))
        );

        let no_timeout = TxEvent::builder()
            .event_type(EventType::SagaStarted)
            .global_tx_id(global_tx_id)
            .build();
        assert_eq!(no_timeout.deadline(), None);

        let ended = TxEvent::builder()
            .event_type(EventType::TxEnded)
            .global_tx_id(global_tx_id)
            .timeout_secs(60)
            .build();
        assert_eq!(ended.deadline(), None);
    }

    #[test]
    fn serialization_roundtrip() {
        let event = TxEvent::builder()
            .event_type(EventType::TxAborted)
            .global_tx_id(GlobalTxId::new())
            .local_tx_id(LocalTxId::new())
            .payload(b"boom".to_vec())
            .status(TxStatus::Failed)
            .build();

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: TxEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.event_id, event.event_id);
        assert_eq!(deserialized.event_type, EventType::TxAborted);
        assert_eq!(deserialized.payload, b"boom");
        assert_eq!(deserialized.status, Some(TxStatus::Failed));
    }
}
