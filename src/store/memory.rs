//! In-process record store with an ordered mutation log.
//!
//! Records live in a `BTreeMap` behind an async `RwLock`. Every mutation
//! appends one entry to a broadcast-backed log while the write lock is held,
//! so the log order always matches the order in which records changed.

use super::models::{sync_location, Document, RawLogEntry, RecordId, ID_FIELD};
use super::traits::{MutationLog, RecordStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// Default number of log entries a subscriber may fall behind before it errors
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

const CREATED_AT: &str = "createdAt";
const UPDATED_AT: &str = "updatedAt";

/// Errors surfaced by store mutations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} already exists")]
    DuplicateId(RecordId),
    #[error("invalid record id: {0}")]
    InvalidId(Value),
}

/// Options for [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// Embed the post-mutation document in insert/update/replace log entries.
    /// When false, consumers must look records up themselves.
    pub embed_full_document: bool,
    /// Log entries buffered per subscriber before it is reported as lagging
    pub log_capacity: usize,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            embed_full_document: true,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// In-memory [`RecordStore`] implementation.
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordId, Document>>,
    log: broadcast::Sender<RawLogEntry>,
    embed_full_document: bool,
}

impl MemoryStore {
    pub fn new(options: MemoryStoreOptions) -> Self {
        let (log, _) = broadcast::channel(options.log_capacity.max(1));
        Self {
            records: RwLock::new(BTreeMap::new()),
            log,
            embed_full_document: options.embed_full_document,
        }
    }

    /// Insert a new record.
    ///
    /// A string `_id` in `fields` is used as the identifier; otherwise one is
    /// generated. Returns the stored document.
    pub async fn insert(&self, mut fields: Document) -> Result<Document, StoreError> {
        let id = match fields.shift_remove(ID_FIELD) {
            None => RecordId::generate(),
            Some(Value::String(s)) if !s.is_empty() => RecordId::from(s),
            Some(other) => return Err(StoreError::InvalidId(other)),
        };

        let mut records = self.records.write().await;
        if records.contains_key(&id) {
            return Err(StoreError::DuplicateId(id));
        }

        let now = stored_timestamp();
        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), id.to_stored());
        doc.extend(fields);
        doc.entry("details").or_insert(Value::String(String::new()));
        doc.insert(CREATED_AT.to_string(), now.clone());
        doc.insert(UPDATED_AT.to_string(), now);
        sync_location(&mut doc);

        records.insert(id.clone(), doc.clone());
        self.append("insert", &id, Some(&doc));
        Ok(doc)
    }

    /// Merge `fields` into an existing record. Returns the updated document,
    /// or `None` if the record does not exist.
    pub async fn update(&self, id: &RecordId, fields: Document) -> Option<Document> {
        let mut records = self.records.write().await;
        let doc = records.get_mut(id)?;

        for (key, value) in fields {
            if key != ID_FIELD && key != CREATED_AT {
                doc.insert(key, value);
            }
        }
        doc.insert(UPDATED_AT.to_string(), stored_timestamp());
        sync_location(doc);

        let doc = doc.clone();
        self.append("update", id, Some(&doc));
        Some(doc)
    }

    /// Replace the body of an existing record, keeping its id and creation time.
    pub async fn replace(&self, id: &RecordId, fields: Document) -> Option<Document> {
        let mut records = self.records.write().await;
        let existing = records.get_mut(id)?;

        let mut doc = Document::new();
        doc.insert(ID_FIELD.to_string(), id.to_stored());
        doc.extend(
            fields
                .into_iter()
                .filter(|(key, _)| key != ID_FIELD && key != CREATED_AT),
        );
        if let Some(created) = existing.get(CREATED_AT) {
            doc.insert(CREATED_AT.to_string(), created.clone());
        }
        doc.insert(UPDATED_AT.to_string(), stored_timestamp());
        sync_location(&mut doc);

        *existing = doc.clone();
        self.append("replace", id, Some(&doc));
        Some(doc)
    }

    /// Delete a record. Returns whether it existed.
    pub async fn delete(&self, id: &RecordId) -> bool {
        let mut records = self.records.write().await;
        if records.remove(id).is_none() {
            return false;
        }
        self.append("delete", id, None);
        true
    }

    /// Remove every record at once, logged as a single collection-level `drop`.
    pub async fn clear(&self) {
        let mut records = self.records.write().await;
        records.clear();
        let _ = self.log.send(RawLogEntry::collection("drop"));
    }

    pub async fn get(&self, id: &RecordId) -> Option<Document> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Number of open mutation log subscriptions
    pub fn log_subscriber_count(&self) -> usize {
        self.log.receiver_count()
    }

    fn append(&self, operation: &str, id: &RecordId, doc: Option<&Document>) {
        let full_document = doc.filter(|_| self.embed_full_document).cloned();
        let entry = RawLogEntry::new(operation, id, full_document);
        // No subscribers is fine: nobody is watching yet.
        if let Ok(n) = self.log.send(entry) {
            debug!(operation, record_id = %id, subscribers = n, "mutation logged");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreOptions::default())
    }
}

fn stored_timestamp() -> Value {
    json!({ "$date": chrono::Utc::now().to_rfc3339() })
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn subscribe_to_mutations(&self) -> Result<MutationLog> {
        let stream = BroadcastStream::new(self.log.subscribe())
            .map(|item| item.map_err(|e| anyhow!("mutation log subscription broken: {}", e)));
        Ok(stream.boxed())
    }

    async fn find_record_by_id(&self, id: &RecordId) -> Result<Option<Document>> {
        Ok(self.get(id).await)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
