//! Change event types: decoded mutations and their wire form

use crate::store::{Document, RecordId};
use serde::{Deserialize, Serialize};

/// Tag used when a log entry carries no usable operation type
pub const UNKNOWN_OPERATION: &str = "unknown";

/// The kind of mutation a log entry describes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Replace,
    Delete,
    /// Any other operation (collection drops, invalidations, malformed entries)
    Other(String),
}

impl OperationKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "replace" => Self::Replace,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    /// The tag sent to clients in the `type` field
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Other(tag) => tag,
        }
    }

    /// Whether events of this kind carry the current record
    pub fn carries_record(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Replace)
    }
}

/// A decoded mutation log entry.
///
/// `record` is the embedded full document, if the log supplied one. It is
/// always `None` for operations that do not carry a record.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub operation: OperationKind,
    pub record_id: Option<RecordId>,
    pub record: Option<Document>,
}

/// The event sent to streaming clients: `{"type": .., "id": .., "doc": ..}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: Option<String>,
    pub doc: Option<Document>,
}

impl WireEvent {
    pub fn new(operation: &OperationKind, id: Option<&RecordId>, doc: Option<Document>) -> Self {
        Self {
            event_type: operation.as_tag().to_string(),
            id: id.map(|id| id.as_str().to_string()),
            doc,
        }
    }
}
