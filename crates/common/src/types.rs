use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a global transaction.
///
/// Wraps a UUID to provide type safety and prevent mixing up
/// global transaction ids with sub-transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTxId(Uuid);

impl GlobalTxId {
    /// Creates a new random global transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a global transaction ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for GlobalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for GlobalTxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<GlobalTxId> for Uuid {
    fn from(id: GlobalTxId) -> Self {
        id.0
    }
}

/// Unique identifier for one participant's sub-transaction within a
/// global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalTxId(Uuid);

impl LocalTxId {
    /// Creates a new random local transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a local transaction ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LocalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalTxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LocalTxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<LocalTxId> for Uuid {
    fn from(id: LocalTxId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_tx_id_new_creates_unique_ids() {
        let id1 = GlobalTxId::new();
        let id2 = GlobalTxId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn global_tx_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = GlobalTxId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn local_tx_id_serialization_roundtrip() {
        let id = LocalTxId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: LocalTxId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
