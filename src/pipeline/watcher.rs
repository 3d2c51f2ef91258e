//! Mutation watcher: keeps a live subscription to the store's mutation log
//! and publishes every entry to the change bus.
//!
//! The supervisor task is an explicit state machine:
//! `Stopped → Starting → Active → (failure) Stopped → backoff → Starting …`.
//! It never gives up on its own; only `stop()` ends it. Entries written while
//! the subscription is down are not replayed.

use super::resolver::RecordResolver;
use crate::events::{codec, ChangeBus};
use crate::store::{MutationLog, RawLogEntry, RecordStore};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default delay before re-subscribing after a failure
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(3);

/// Lifecycle of the mutation log subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Stopped,
    Starting,
    Active,
}

/// How one subscription attempt ended
enum RunOutcome {
    Cancelled,
    Failed,
}

/// Process-wide watcher of the store's mutation log.
///
/// Create one at startup and share it behind an `Arc`.
pub struct MutationWatcher {
    store: Arc<dyn RecordStore>,
    bus: Arc<ChangeBus>,
    resolver: RecordResolver,
    backoff: Duration,
    state: watch::Sender<WatcherState>,
    /// Present while a supervisor task is running
    cancel: Mutex<Option<CancellationToken>>,
    restarts: AtomicU64,
}

impl MutationWatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        bus: Arc<ChangeBus>,
        lookup_timeout: Duration,
        backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::Stopped);
        Self {
            resolver: RecordResolver::new(store.clone(), lookup_timeout),
            store,
            bus,
            backoff,
            state,
            cancel: Mutex::new(None),
            restarts: AtomicU64::new(0),
        }
    }

    /// Ensure the log subscription is running.
    ///
    /// No-op while a supervisor task already exists, whether it is starting,
    /// active, or waiting out a backoff. Returns whether a task was spawned.
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        *cancel = Some(token.clone());
        drop(cancel);

        let this = self.clone();
        tokio::spawn(async move { this.supervise(token).await });
        tracing::info!("Mutation watcher started");
        true
    }

    /// Stop the supervisor task and leave the watcher `Stopped`.
    pub fn stop(&self) {
        let mut cancel = self.cancel.lock();
        if let Some(token) = cancel.take() {
            token.cancel();
            self.state.send_replace(WatcherState::Stopped);
            drop(cancel);
            tracing::info!("Mutation watcher stopped");
        }
    }

    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.state.subscribe()
    }

    /// Number of times the subscription has been re-opened after a failure
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    async fn supervise(self: Arc<Self>, token: CancellationToken) {
        loop {
            self.transition(&token, WatcherState::Starting);

            let opened = tokio::select! {
                _ = token.cancelled() => break,
                opened = self.store.subscribe_to_mutations() => opened,
            };

            match opened {
                Ok(log) => {
                    self.transition(&token, WatcherState::Active);
                    tracing::info!("Mutation log subscription active");
                    if let RunOutcome::Cancelled = self.consume(log, &token).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to open mutation log subscription");
                }
            }

            self.transition(&token, WatcherState::Stopped);
            tracing::info!(
                backoff_ms = self.backoff.as_millis() as u64,
                "Restarting mutation log subscription after backoff"
            );
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.backoff) => {}
            }
            self.restarts.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!("Mutation watcher supervisor exited");
    }

    async fn consume(&self, mut log: MutationLog, token: &CancellationToken) -> RunOutcome {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return RunOutcome::Cancelled,
                next = log.next() => next,
            };

            match next {
                Some(Ok(entry)) => self.dispatch(entry).await,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Mutation log subscription failed");
                    return RunOutcome::Failed;
                }
                None => {
                    tracing::warn!("Mutation log subscription ended unexpectedly");
                    return RunOutcome::Failed;
                }
            }
        }
    }

    async fn dispatch(&self, entry: RawLogEntry) {
        match codec::normalize(entry, &self.resolver).await {
            Ok(event) => {
                let delivered = self.bus.publish(&event);
                tracing::debug!(
                    operation = %event.event_type,
                    record_id = ?event.id,
                    subscribers = delivered,
                    "Change published"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping mutation log entry that could not be normalized");
            }
        }
    }

    /// Set the state unless this supervisor has been cancelled. The check and
    /// the send happen under the `cancel` lock, which `stop` also holds while
    /// cancelling, so a stopped task never overwrites `Stopped` or the state
    /// of its successor.
    fn transition(&self, token: &CancellationToken, next: WatcherState) {
        let _cancel = self.cancel.lock();
        if !token.is_cancelled() {
            self.state.send_replace(next);
        }
    }
}
