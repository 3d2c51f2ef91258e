//! Trait abstraction for the record store capability consumed by the change pipeline

use super::models::{Document, RawLogEntry, RecordId};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Live, ordered sequence of mutation log entries.
///
/// An `Err` item or the end of the stream means the subscription is broken;
/// callers are expected to open a new one.
pub type MutationLog = BoxStream<'static, Result<RawLogEntry>>;

/// Operations the change pipeline needs from the backing store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open a live subscription to the store's mutation log, starting now.
    async fn subscribe_to_mutations(&self) -> Result<MutationLog>;

    /// Point lookup of the current record, `None` if it does not exist.
    async fn find_record_by_id(&self, id: &RecordId) -> Result<Option<Document>>;

    /// Check that the store is reachable
    async fn health_check(&self) -> Result<bool>;
}
