//! Record and mutation-log data types

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use uuid::Uuid;

/// A stored record: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Field holding the record identifier inside a document.
pub const ID_FIELD: &str = "_id";

/// Opaque record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage form of the identifier, as it appears in stored documents
    /// and in log entry keys.
    pub fn to_stored(&self) -> Value {
        json!({ "$oid": self.0 })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One entry of the store's ordered mutation log.
///
/// Fields are kept as raw JSON so that entries of unexpected shape can still
/// be decoded (and downgraded) instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_document: Option<Value>,
}

impl RawLogEntry {
    /// Build an entry for an operation on a single record
    pub fn new(operation: &str, id: &RecordId, full_document: Option<Document>) -> Self {
        Self {
            operation_type: Some(Value::String(operation.to_string())),
            document_key: Some(json!({ ID_FIELD: id.to_stored() })),
            full_document: full_document.map(Value::Object),
        }
    }

    /// Build an entry for a collection-level operation (no record key)
    pub fn collection(operation: &str) -> Self {
        Self {
            operation_type: Some(Value::String(operation.to_string())),
            ..Default::default()
        }
    }
}

/// Keep the GeoJSON `location` point in sync with `lat`/`lng`.
///
/// The point is set only when both coordinates are finite numbers and is
/// removed otherwise. Coordinates are stored `[lng, lat]`.
pub fn sync_location(doc: &mut Document) {
    let lat = doc.get("lat").cloned().filter(is_finite_number);
    let lng = doc.get("lng").cloned().filter(is_finite_number);

    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            doc.insert(
                "location".to_string(),
                json!({ "type": "Point", "coordinates": [lng, lat] }),
            );
        }
        _ => {
            doc.shift_remove("location");
        }
    }
}

fn is_finite_number(value: &Value) -> bool {
    value.as_f64().is_some_and(f64::is_finite)
}
