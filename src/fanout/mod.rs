//! Subscriber fanout.
//!
//! A [`SubscriberSet`] is the explicit list of live handles for one task. The
//! registry owns one per task and drives it under the task's slot lock, so
//! every handle sees events in the same order.

pub mod event;
mod observer;

pub use event::{EventKind, Frame, StreamEvent};
pub use observer::{ChannelObserver, DeliveryError, Observer, ObserverId};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Subscriber {
    handle: Arc<dyn Observer>,
    last_write: Instant,
}

/// Live observer handles of one task.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Vec<Subscriber>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.subscribers.iter().any(|s| s.handle.id() == id)
    }

    pub fn add(&mut self, handle: Arc<dyn Observer>, now: Instant) {
        if self.contains(handle.id()) {
            return;
        }
        self.subscribers.push(Subscriber {
            handle,
            last_write: now,
        });
    }

    /// Remove a handle without closing it. Returns whether it was present.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.handle.id() != id);
        self.subscribers.len() != before
    }

    /// Write a frame to every handle. Handles that fail are dropped; the
    /// number of handles dropped is returned.
    pub fn broadcast(&mut self, frame: &Frame, now: Instant) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain_mut(|sub| match sub.handle.deliver(frame) {
            Ok(()) => {
                sub.last_write = now;
                true
            }
            Err(e) => {
                tracing::warn!(
                    observer = %sub.handle.id(),
                    kind = frame.kind.as_str(),
                    "Dropping subscriber: {}",
                    e
                );
                sub.handle.close();
                false
            }
        });
        before - self.subscribers.len()
    }

    /// Send a heartbeat to handles idle for at least `idle`.
    pub fn heartbeat(&mut self, now: Instant, idle: Duration) -> usize {
        let frame = Frame::heartbeat();
        let before = self.subscribers.len();
        self.subscribers.retain_mut(|sub| {
            if now.saturating_duration_since(sub.last_write) < idle {
                return true;
            }
            match sub.handle.deliver(&frame) {
                Ok(()) => {
                    sub.last_write = now;
                    true
                }
                Err(e) => {
                    tracing::debug!(observer = %sub.handle.id(), "Heartbeat failed: {}", e);
                    sub.handle.close();
                    false
                }
            }
        });
        before - self.subscribers.len()
    }

    /// Close and forget every handle.
    pub fn close_all(&mut self) -> usize {
        let count = self.subscribers.len();
        for sub in self.subscribers.drain(..) {
            sub.handle.close();
        }
        count
    }
}
