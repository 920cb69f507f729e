//! Observer handles: the registry's view of a transport connection.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::event::Frame;

pub type ObserverId = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("observer closed")]
    Closed,
    #[error("observer buffer full")]
    Backpressure,
}

/// A live connection that frames are written to.
///
/// `deliver` must not block: a handle that cannot accept a frame right now is
/// reported dead and removed, so one slow consumer never holds up the rest.
pub trait Observer: Send + Sync {
    fn id(&self) -> ObserverId;

    fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError>;

    /// End the stream. Further deliveries fail with [`DeliveryError::Closed`].
    fn close(&self);
}

/// Observer backed by a bounded channel; the receiving half feeds the
/// transport (an SSE response in the HTTP adapter).
pub struct ChannelObserver {
    id: ObserverId,
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let observer = Arc::new(Self {
            id: Uuid::new_v4(),
            tx: Mutex::new(Some(tx)),
        });
        (observer, rx)
    }
}

impl Observer for ChannelObserver {
    fn id(&self) -> ObserverId {
        self.id
    }

    fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(DeliveryError::Closed)?;
        tx.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}
