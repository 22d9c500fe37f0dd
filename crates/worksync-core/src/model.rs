use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// The kind of mutation a queued operation applies to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(OperationKind::Create),
            "update" => Some(OperationKind::Update),
            "delete" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

/// A mutation as submitted by a caller, before the queue assigns it an id.
///
/// The payload is an opaque JSON value; whatever structure a collection uses
/// must survive serialize → enqueue → deserialize unchanged. For deletes the
/// payload is ignored and normally `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDraft {
    pub kind: OperationKind,
    pub collection: String,
    pub record_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl OperationDraft {
    pub fn new(
        kind: OperationKind,
        collection: impl Into<String>,
        record_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            collection: collection.into(),
            record_id: record_id.into(),
            payload,
        }
    }

    pub fn create(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(OperationKind::Create, collection, record_id, payload)
    }

    pub fn update(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(OperationKind::Update, collection, record_id, payload)
    }

    pub fn delete(collection: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, collection, record_id, Value::Null)
    }

    /// Content fingerprint used to drop duplicates delivered by a peer.
    ///
    /// serde_json keeps object keys sorted, so two drafts with equal content
    /// always hash the same regardless of how their payloads were built.
    pub fn fingerprint(&self) -> String {
        let payload = self.payload.to_string();
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.collection.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.record_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A mutation persisted in the local queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Store-assigned key, monotonically increasing within one device.
    pub id: i64,
    pub kind: OperationKind,
    pub collection: String,
    pub record_id: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub synced: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// The draft view of this row, used when replaying it or sending it to a
    /// peer.
    pub fn draft(&self) -> OperationDraft {
        OperationDraft {
            kind: self.kind,
            collection: self.collection.clone(),
            record_id: self.record_id.clone(),
            payload: self.payload.clone(),
        }
    }
}
