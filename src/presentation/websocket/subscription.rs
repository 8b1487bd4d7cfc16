//! Channel Subscription Registry
//!
//! Maps each channel to the connections interested in it. Writers take the
//! exclusive lock, readers the shared one; nothing here touches a socket.
//! Lock order is always registry first, then the client's own channel set.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::client::{Client, ConnectionId};
use crate::domain::ChannelId;

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    channels: RwLock<HashMap<ChannelId, HashMap<ConnectionId, Arc<Client>>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `client` to the channel. Idempotent.
    pub fn subscribe_channel(&self, client: &Arc<Client>, channel_id: ChannelId) {
        let mut channels = self.channels.write();
        channels
            .entry(channel_id)
            .or_default()
            .insert(client.id(), Arc::clone(client));
        client.track(channel_id);
    }

    /// Remove `client` from the channel, dropping the channel entry once it
    /// has no subscribers. A no-op when not subscribed.
    pub fn unsubscribe_channel(&self, client: &Client, channel_id: ChannelId) {
        let mut channels = self.channels.write();
        if let Some(subscribers) = channels.get_mut(&channel_id) {
            subscribers.remove(&client.id());
            if subscribers.is_empty() {
                channels.remove(&channel_id);
            }
        }
        client.untrack(&channel_id);
    }

    /// Remove `client` from every channel it is tracked in. Returns the
    /// number of channels it was removed from.
    pub fn unsubscribe_all(&self, client: &Client) -> usize {
        let mut channels = self.channels.write();
        let tracked = client.take_channels();
        let mut removed = 0;

        for channel_id in tracked {
            if let Some(subscribers) = channels.get_mut(&channel_id) {
                if subscribers.remove(&client.id()).is_some() {
                    removed += 1;
                }
                if subscribers.is_empty() {
                    channels.remove(&channel_id);
                }
            }
        }

        removed
    }

    /// Snapshot of the channel's current subscribers.
    pub fn get_subscribers(&self, channel_id: &ChannelId) -> Vec<Arc<Client>> {
        self.channels
            .read()
            .get(channel_id)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel_id: &ChannelId) -> usize {
        self.channels
            .read()
            .get(channel_id)
            .map_or(0, |subscribers| subscribers.len())
    }

    pub fn is_subscribed(&self, client: &Client, channel_id: &ChannelId) -> bool {
        self.channels
            .read()
            .get(channel_id)
            .is_some_and(|subscribers| subscribers.contains_key(&client.id()))
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}
