//! Failure-injecting wrapper around `MemoryStore` for testing recovery paths.

use super::memory::MemoryStore;
use super::models::{Document, RecordId};
use super::traits::{MutationLog, RecordStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Store that can fail subscriptions and lookups on demand.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    /// Cancelled to break every currently open mutation log
    interrupt: Mutex<CancellationToken>,
    failing_subscribes: AtomicUsize,
    failing_lookups: AtomicUsize,
    lookup_delay: Mutex<Option<Duration>>,
    subscribe_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            interrupt: Mutex::new(CancellationToken::new()),
            failing_subscribes: AtomicUsize::new(0),
            failing_lookups: AtomicUsize::new(0),
            lookup_delay: Mutex::new(None),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// Terminate every open mutation log with an error item.
    pub fn interrupt_subscriptions(&self) {
        let old = std::mem::replace(&mut *self.interrupt.lock(), CancellationToken::new());
        old.cancel();
    }

    /// Make the next `n` subscription attempts fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` record lookups fail.
    pub fn fail_next_lookups(&self, n: usize) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }

    /// Delay every record lookup.
    pub fn set_lookup_delay(&self, delay: Option<Duration>) {
        *self.lookup_delay.lock() = delay;
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn subscribe_to_mutations(&self) -> Result<MutationLog> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_subscribes) {
            return Err(anyhow!("injected subscribe failure"));
        }

        let token = self.interrupt.lock().clone();
        let log = self.inner.subscribe_to_mutations().await?;
        let broken = stream::once(async { Err(anyhow!("injected subscription interrupt")) });
        Ok(log
            .take_until(token.cancelled_owned())
            .chain(broken)
            .boxed())
    }

    async fn find_record_by_id(&self, id: &RecordId) -> Result<Option<Document>> {
        let delay = *self.lookup_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take_failure(&self.failing_lookups) {
            return Err(anyhow!("injected lookup failure"));
        }
        self.inner.find_record_by_id(id).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}
