//! Event codec: raw log entry → `MutationEvent` → `WireEvent` → SSE frame

use super::types::{MutationEvent, OperationKind, WireEvent, UNKNOWN_OPERATION};
use crate::pipeline::RecordResolver;
use crate::store::models::ID_FIELD;
use crate::store::{Document, RawLogEntry, RecordId};
use serde_json::Value;
use tracing::debug;

/// Sent once when a stream opens, before any data frame
pub const CONNECTED_FRAME: &str = ": connected\n\n";

/// Extended-JSON wrappers the store uses for typed scalars
const WRAPPER_KEYS: [&str; 6] = [
    "$oid",
    "$date",
    "$numberLong",
    "$numberInt",
    "$numberDouble",
    "$numberDecimal",
];

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("embedded document is not an object (found {0})")]
    MalformedDocument(&'static str),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Decode a raw log entry.
///
/// Entries without a string operation type are downgraded to an unknown
/// `Other` operation with no record.
pub fn decode(entry: RawLogEntry) -> Result<MutationEvent, CodecError> {
    let record_id = entry.document_key.as_ref().and_then(key_to_id);

    let operation = match entry.operation_type.as_ref().and_then(Value::as_str) {
        Some(tag) => OperationKind::from_tag(tag),
        None => {
            debug!(operation_type = ?entry.operation_type, "log entry has no operation type");
            return Ok(MutationEvent {
                operation: OperationKind::Other(UNKNOWN_OPERATION.to_string()),
                record_id,
                record: None,
            });
        }
    };

    let record = if operation.carries_record() {
        match entry.full_document {
            None | Some(Value::Null) => None,
            Some(Value::Object(doc)) => Some(doc),
            Some(other) => return Err(CodecError::MalformedDocument(json_kind(&other))),
        }
    } else {
        None
    };

    Ok(MutationEvent {
        operation,
        record_id,
        record,
    })
}

/// Turn a decoded mutation into its wire form, looking the record up when the
/// log did not embed it.
pub async fn to_wire(event: MutationEvent, resolver: &RecordResolver) -> WireEvent {
    let doc = match (event.operation.carries_record(), event.record, &event.record_id) {
        (false, _, _) => None,
        (true, Some(doc), _) => Some(doc),
        (true, None, Some(id)) => resolver.resolve(id).await,
        (true, None, None) => None,
    };

    WireEvent::new(
        &event.operation,
        event.record_id.as_ref(),
        doc.map(normalize_record),
    )
}

/// Decode and normalize a raw log entry in one step.
pub async fn normalize(
    entry: RawLogEntry,
    resolver: &RecordResolver,
) -> Result<WireEvent, CodecError> {
    let event = decode(entry)?;
    Ok(to_wire(event, resolver).await)
}

/// Client form of a stored record: storage wrappers removed, `_id` a plain string.
pub fn normalize_record(doc: Document) -> Document {
    let mut out: Document = doc
        .into_iter()
        .map(|(key, value)| (key, strip_wrappers(value)))
        .collect();

    if let Some(id) = out.get_mut(ID_FIELD) {
        if !matches!(id, Value::String(_) | Value::Null) {
            let text = id.to_string();
            *id = Value::String(text);
        }
    }
    out
}

/// Render one `data:` frame.
pub fn encode_frame(event: &WireEvent) -> Result<String, CodecError> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

fn strip_wrappers(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let is_wrapper = map.len() == 1
                && map
                    .keys()
                    .next()
                    .is_some_and(|k| WRAPPER_KEYS.contains(&k.as_str()));
            if is_wrapper {
                let inner = map.into_iter().next().map(|(_, v)| v);
                return strip_wrappers(inner.unwrap_or(Value::Null));
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, strip_wrappers(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(strip_wrappers).collect()),
        other => other,
    }
}

fn key_to_id(key: &Value) -> Option<RecordId> {
    let raw = match key {
        Value::Object(map) if map.contains_key(ID_FIELD) => map.get(ID_FIELD)?.clone(),
        other => other.clone(),
    };
    match strip_wrappers(raw) {
        Value::String(s) => Some(RecordId::from(s)),
        Value::Number(n) => Some(RecordId::from(n.to_string())),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::FlakyStore;
    use crate::store::{MemoryStore, RecordStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn entry(value: Value) -> RawLogEntry {
        serde_json::from_value(value).unwrap()
    }

    fn resolver_for(store: Arc<dyn RecordStore>) -> RecordResolver {
        RecordResolver::new(store, Duration::from_secs(1))
    }

    #[test]
    fn test_decode_insert_with_embedded_document() {
        let event = decode(entry(json!({
            "operationType": "insert",
            "documentKey": {"_id": {"$oid": "R1"}},
            "fullDocument": {"_id": {"$oid": "R1"}, "name": "Acme"}
        })))
        .unwrap();

        assert_eq!(event.operation, OperationKind::Insert);
        assert_eq!(event.record_id, Some(RecordId::from("R1")));
        assert_eq!(event.record.unwrap()["name"], "Acme");
    }

    #[test]
    fn test_decode_delete_drops_document() {
        let event = decode(entry(json!({
            "operationType": "delete",
            "documentKey": {"_id": "R1"},
            "fullDocument": {"name": "stale"}
        })))
        .unwrap();
        assert_eq!(event.operation, OperationKind::Delete);
        assert!(event.record.is_none());
    }

    #[test]
    fn test_decode_malformed_entry_is_other() {
        let event = decode(entry(json!({"operationType": 42, "documentKey": {"_id": 7}}))).unwrap();
        assert_eq!(event.operation, OperationKind::Other("unknown".into()));
        assert_eq!(event.record_id, Some(RecordId::from("7")));
        assert!(event.record.is_none());

        let event = decode(RawLogEntry::default()).unwrap();
        assert_eq!(event.operation, OperationKind::Other("unknown".into()));
        assert!(event.record_id.is_none());
    }

    #[test]
    fn test_decode_rejects_non_object_document() {
        let err = decode(entry(json!({
            "operationType": "update",
            "documentKey": {"_id": "R1"},
            "fullDocument": [1, 2]
        })))
        .unwrap_err();
        assert!(matches!(err, CodecError::MalformedDocument("array")));
    }

    #[test]
    fn test_normalize_record_strips_wrappers() {
        let doc = json!({
            "_id": {"$oid": "R1"},
            "name": "Acme",
            "createdAt": {"$date": "2026-01-01T00:00:00Z"},
            "visits": {"$numberLong": "12"},
            "tags": [{"$oid": "t1"}],
            "location": {"type": "Point", "coordinates": [2, 1]}
        });
        let normalized = normalize_record(doc.as_object().cloned().unwrap());
        assert_eq!(
            Value::Object(normalized),
            json!({
                "_id": "R1",
                "name": "Acme",
                "createdAt": "2026-01-01T00:00:00Z",
                "visits": "12",
                "tags": ["t1"],
                "location": {"type": "Point", "coordinates": [2, 1]}
            })
        );
    }

    #[test]
    fn test_normalize_record_coerces_numeric_id() {
        let doc = json!({"_id": 17, "name": "x"});
        let normalized = normalize_record(doc.as_object().cloned().unwrap());
        assert_eq!(normalized["_id"], "17");
    }

    #[test]
    fn test_normalize_record_stringifies_other_ids() {
        let normalized = normalize_record(json!({"_id": true}).as_object().cloned().unwrap());
        assert_eq!(normalized["_id"], "true");

        let doc = json!({"_id": {"site": "north", "seq": 4}, "name": "x"});
        let normalized = normalize_record(doc.as_object().cloned().unwrap());
        assert_eq!(normalized["_id"], r#"{"site":"north","seq":4}"#);
        assert_eq!(normalized["name"], "x");

        let normalized = normalize_record(json!({"_id": null}).as_object().cloned().unwrap());
        assert!(normalized["_id"].is_null());
    }

    #[test]
    fn test_encode_frame() {
        let event = WireEvent::new(&OperationKind::Delete, Some(&RecordId::from("R1")), None);
        assert_eq!(
            encode_frame(&event).unwrap(),
            "data: {\"type\":\"delete\",\"id\":\"R1\",\"doc\":null}\n\n"
        );
    }

    #[test]
    fn test_encoded_frame_has_no_inner_blank_line() {
        let doc = json!({"_id": "R1", "details": "line one\n\nline two"});
        let event = WireEvent::new(
            &OperationKind::Insert,
            Some(&RecordId::from("R1")),
            doc.as_object().cloned(),
        );
        let frame = encode_frame(&event).unwrap();
        assert_eq!(frame.matches("\n\n").count(), 1);
        assert!(frame.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_normalize_resolves_missing_document() {
        let store = Arc::new(MemoryStore::default());
        store
            .insert(json!({"_id": "R1", "name": "Acme"}).as_object().cloned().unwrap())
            .await
            .unwrap();
        let resolver = resolver_for(store);

        let event = normalize(
            entry(json!({"operationType": "update", "documentKey": {"_id": {"$oid": "R1"}}})),
            &resolver,
        )
        .await
        .unwrap();

        assert_eq!(event.event_type, "update");
        assert_eq!(event.id.as_deref(), Some("R1"));
        let doc = event.doc.unwrap();
        assert_eq!(doc["_id"], "R1");
        assert_eq!(doc["name"], "Acme");
        assert!(doc["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_normalize_missing_record_yields_null_doc() {
        let resolver = resolver_for(Arc::new(MemoryStore::default()));
        let event = normalize(
            entry(json!({"operationType": "replace", "documentKey": {"_id": "gone"}})),
            &resolver,
        )
        .await
        .unwrap();
        assert_eq!(event.event_type, "replace");
        assert_eq!(event.id.as_deref(), Some("gone"));
        assert!(event.doc.is_none());
    }

    #[tokio::test]
    async fn test_normalize_delete_never_looks_up() {
        let store = Arc::new(FlakyStore::new(Arc::new(MemoryStore::default())));
        store.fail_next_lookups(1);
        let resolver = resolver_for(store.clone());

        let event = normalize(
            entry(json!({"operationType": "delete", "documentKey": {"_id": "R1"}})),
            &resolver,
        )
        .await
        .unwrap();
        assert!(event.doc.is_none());

        // The injected failure is still pending: no lookup happened.
        assert!(store.find_record_by_id(&RecordId::from("R1")).await.is_err());
    }
}
