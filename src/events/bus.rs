//! Change bus: in-process fan-out of wire events to registered subscriptions

use super::codec::CodecError;
use super::WireEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle identifying one registration on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why a subscriber could not take an event
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber is closed")]
    Closed,
    #[error("subscriber queue overflowed")]
    Overflow,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

type Callback = Arc<dyn Fn(&WireEvent) -> Result<(), DeliveryError> + Send + Sync>;

/// Publish/subscribe registry decoupling the mutation watcher from sessions.
///
/// `publish` iterates a snapshot of the registry, so callbacks may subscribe
/// or unsubscribe (including themselves) while being invoked. A failing or
/// panicking callback is logged and never affects other subscribers or the
/// publisher. The bus keeps no per-subscriber queue: callbacks must not block.
pub struct ChangeBus {
    subscribers: RwLock<HashMap<SubscriptionId, Callback>>,
    next_id: AtomicU64,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback. It receives every event published after this call
    /// returns and before the matching `unsubscribe`.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&WireEvent) -> Result<(), DeliveryError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().insert(id, Arc::new(callback));
        debug!(subscription_id = %id, "subscription registered");
        id
    }

    /// Remove a registration. Returns false if it was already gone.
    ///
    /// Publishes that start after this returns never reach the callback; a
    /// publish already in flight may still invoke it once.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.write().remove(&id).is_some();
        if removed {
            debug!(subscription_id = %id, "subscription cancelled");
        }
        removed
    }

    /// Deliver `event` to every current subscription. Returns how many
    /// subscribers accepted it.
    pub fn publish(&self, event: &WireEvent) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(DeliveryError::Closed)) => {
                    debug!(subscription_id = %id, "skipping closed subscriber");
                }
                Ok(Err(e)) => {
                    warn!(subscription_id = %id, error = %e, "delivery failed");
                }
                Err(_) => {
                    warn!(subscription_id = %id, "subscriber panicked during delivery");
                }
            }
        }
        delivered
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
