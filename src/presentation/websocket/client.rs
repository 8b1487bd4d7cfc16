//! Hub-side view of one connection
//!
//! A `Client` is what the Hub and the SubscriptionManager hold: the
//! identity, the tracked channel set and the producer end of the bounded
//! outbound queue. The socket itself belongs to the connection pumps.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::domain::{ChannelId, UserId};

/// Unique per physical connection; two sessions of the same user differ.
pub type ConnectionId = Uuid;

/// Why a non-blocking enqueue did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    Full,
    /// The queue was already closed.
    Closed,
}

#[derive(Debug)]
pub struct Client {
    id: ConnectionId,
    user_id: UserId,
    channels: Mutex<HashSet<ChannelId>>,
    sender: Mutex<Option<mpsc::Sender<Utf8Bytes>>>,
}

impl Client {
    /// Create a client and the consumer end of its outbound queue.
    pub fn new(user_id: UserId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let client = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            channels: Mutex::new(HashSet::new()),
            sender: Mutex::new(Some(tx)),
        });
        (client, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, message: Utf8Bytes) -> Result<(), EnqueueError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue. Returns `true` only for the call that
    /// actually closed it.
    pub fn close_queue(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Snapshot of the channels this client is subscribed to.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.channels.lock().iter().copied().collect()
    }

    pub(crate) fn track(&self, channel_id: ChannelId) {
        self.channels.lock().insert(channel_id);
    }

    pub(crate) fn untrack(&self, channel_id: &ChannelId) {
        self.channels.lock().remove(channel_id);
    }

    pub(crate) fn take_channels(&self) -> HashSet<ChannelId> {
        std::mem::take(&mut *self.channels.lock())
    }
}
