//! Streaming sessions: one per connected client, each owning one bus
//! subscription and one bounded frame queue.

use super::queue::{FrameQueue, OverflowPolicy, Pushed};
use crate::events::{codec, ChangeBus, DeliveryError, SubscriptionId, WireEvent, CONNECTED_FRAME};
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of frames buffered per session
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opening,
    Streaming,
    Closing,
    Closed,
}

/// Per-session delivery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

pub struct Session {
    id: Uuid,
    state: Mutex<SessionState>,
    queue: FrameQueue,
    subscription: Mutex<Option<SubscriptionId>>,
    bus: Arc<ChangeBus>,
}

impl Session {
    fn new(bus: Arc<ChangeBus>, config: &SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: Mutex::new(SessionState::Opening),
            queue: FrameQueue::new(config.queue_capacity, config.overflow_policy),
            subscription: Mutex::new(None),
            bus,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Frames evicted from this session's queue so far
    pub fn evicted_frames(&self) -> u64 {
        self.queue.evicted()
    }

    /// Bus callback body: encode the event and enqueue one frame.
    fn deliver(&self, event: &WireEvent) -> Result<(), DeliveryError> {
        if !matches!(self.state(), SessionState::Opening | SessionState::Streaming) {
            return Err(DeliveryError::Closed);
        }

        let frame = codec::encode_frame(event)?;
        match self.queue.push(frame) {
            Ok(Pushed::Queued) => Ok(()),
            Ok(Pushed::Evicted) => {
                debug!(
                    session_id = %self.id,
                    evicted = self.queue.evicted(),
                    "session queue full, dropped oldest frame"
                );
                Ok(())
            }
            Err(DeliveryError::Overflow) => {
                warn!(session_id = %self.id, "session queue overflowed");
                self.close("queue overflow");
                Err(DeliveryError::Overflow)
            }
            Err(e) => Err(e),
        }
    }

    /// Opening → Streaming. Returns false if the session was closed meanwhile.
    fn begin_streaming(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            SessionState::Opening => {
                *state = SessionState::Streaming;
                true
            }
            SessionState::Streaming => true,
            SessionState::Closing | SessionState::Closed => false,
        }
    }

    /// Closing → unsubscribe → release queue → Closed. Idempotent.
    pub fn close(&self, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                return false;
            }
            *state = SessionState::Closing;
        }

        if let Some(subscription) = self.subscription.lock().take() {
            self.bus.unsubscribe(subscription);
        }
        self.queue.close();
        *self.state.lock() = SessionState::Closed;

        info!(session_id = %self.id, reason, "stream session closed");
        true
    }
}

/// Registry of live streaming sessions
pub struct SessionManager {
    bus: Arc<ChangeBus>,
    config: SessionConfig,
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionManager {
    pub fn new(bus: Arc<ChangeBus>, config: SessionConfig) -> Self {
        Self {
            bus,
            config,
            sessions: DashMap::new(),
        }
    }

    /// Open a session subscribed to the bus.
    ///
    /// The session lives as long as the returned handle; dropping the handle
    /// closes it on every exit path.
    pub fn open(self: &Arc<Self>) -> SessionHandle {
        let session = Arc::new(Session::new(self.bus.clone(), &self.config));

        let weak = Arc::downgrade(&session);
        let subscription = self.bus.subscribe(move |event| match weak.upgrade() {
            Some(session) => session.deliver(event),
            None => Err(DeliveryError::Closed),
        });
        *session.subscription.lock() = Some(subscription);

        if !session.begin_streaming() {
            // Closed by an overflow before the subscription id was recorded
            self.bus.unsubscribe(subscription);
        }

        self.sessions.insert(session.id, session.clone());
        info!(
            session_id = %session.id,
            subscription_id = %subscription,
            active = self.sessions.len(),
            "stream session opened"
        );

        SessionHandle {
            session,
            manager: self.clone(),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Close every live session, ending their streams.
    pub fn close_all(&self, reason: &str) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.iter().filter(|s| s.close(reason)).count()
    }

    fn release(&self, session: &Session, reason: &str) {
        session.close(reason);
        self.sessions.remove(&session.id);
    }
}

/// Owner of one session. Dropping it closes the session.
pub struct SessionHandle {
    session: Arc<Session>,
    manager: Arc<SessionManager>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Next queued frame, or `None` once the session has closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.session.queue.next().await
    }

    /// The session's transport body: the connected comment, then one frame
    /// per delivered event until the session closes.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        stream::once(async { CONNECTED_FRAME.to_string() }).chain(stream::unfold(
            self,
            |mut handle| async move {
                let frame = handle.next_frame().await?;
                Some((frame, handle))
            },
        ))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.manager.release(&self.session, "client disconnected");
    }
}
