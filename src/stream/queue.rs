//! Bounded per-session frame queue

use crate::events::DeliveryError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::Notify;

/// What a full queue does with the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued frame to make room
    #[default]
    DropOldest,
    /// Refuse the frame; the owning session disconnects
    Disconnect,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(Self::DropOldest),
            "disconnect" => Ok(Self::Disconnect),
            other => Err(format!("unknown overflow policy: {}", other)),
        }
    }
}

/// Result of a successful push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Queued,
    /// Queued after evicting the oldest frame
    Evicted,
}

struct Inner {
    frames: VecDeque<String>,
    closed: bool,
    evicted: u64,
}

/// FIFO of encoded frames between the bus callback (producer, never blocks)
/// and the session's body stream (single consumer).
pub struct FrameQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl FrameQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
                evicted: 0,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    pub fn push(&self, frame: String) -> Result<Pushed, DeliveryError> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(DeliveryError::Closed);
            }

            let outcome = if inner.frames.len() < self.capacity {
                Pushed::Queued
            } else {
                match self.policy {
                    OverflowPolicy::Disconnect => return Err(DeliveryError::Overflow),
                    OverflowPolicy::DropOldest => {
                        inner.frames.pop_front();
                        inner.evicted += 1;
                        Pushed::Evicted
                    }
                }
            };
            inner.frames.push_back(frame);
            outcome
        };
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Wait for the next frame. `None` once the queue is closed.
    pub async fn next(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue, discarding pending frames and waking the consumer.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.frames.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames dropped by the `DropOldest` policy so far
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }
}
