//! Record resolver: point-lookup fallback for log entries without a document

use crate::store::{Document, RecordId, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default bound on a single lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Looks up the current version of a record.
///
/// Every failure mode degrades to `None`: a missing record is normal (it may
/// have been deleted since the log entry was written), errors and timeouts are
/// logged.
pub struct RecordResolver {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl RecordResolver {
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn resolve(&self, id: &RecordId) -> Option<Document> {
        match tokio::time::timeout(self.timeout, self.store.find_record_by_id(id)).await {
            Ok(Ok(Some(doc))) => Some(doc),
            Ok(Ok(None)) => {
                debug!(record_id = %id, "record no longer exists");
                None
            }
            Ok(Err(e)) => {
                warn!(record_id = %id, error = %e, "record lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    record_id = %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "record lookup timed out"
                );
                None
            }
        }
    }
}
