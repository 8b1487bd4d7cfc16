//! Event Handler Registry
//!
//! Table from wire `type` tag to a decoder producing a [`TypedEvent`].
//! New event kinds are added by registering a decoder, not by growing a
//! match in the Hub.

use std::collections::HashMap;

use serde_json::value::RawValue;

use crate::domain::events::{
    ChannelSubscription, Event, EventType, MessageCreated, MessageDeleted, MessageUpdated,
};
use crate::domain::{ChannelId, UserId};
use crate::shared::error::HandlerError;

/// A decoded event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    MessageCreated(MessageCreated),
    MessageUpdated(MessageUpdated),
    MessageDeleted(MessageDeleted),
    SubscribeChannels(ChannelSubscription),
    UnsubscribeChannels(ChannelSubscription),
}

/// What the Hub should do with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Fan the envelope out to the channel's subscribers.
    Channel(ChannelId),
    Subscribe {
        user_id: UserId,
        channel_ids: Vec<ChannelId>,
    },
    Unsubscribe {
        user_id: UserId,
        channel_ids: Vec<ChannelId>,
    },
}

impl TypedEvent {
    pub fn route(&self) -> Route {
        match self {
            TypedEvent::MessageCreated(e) => Route::Channel(e.channel_id),
            TypedEvent::MessageUpdated(e) => Route::Channel(e.channel_id),
            TypedEvent::MessageDeleted(e) => Route::Channel(e.channel_id),
            TypedEvent::SubscribeChannels(e) => Route::Subscribe {
                user_id: e.user_id,
                channel_ids: e.channel_ids.clone(),
            },
            TypedEvent::UnsubscribeChannels(e) => Route::Unsubscribe {
                user_id: e.user_id,
                channel_ids: e.channel_ids.clone(),
            },
        }
    }
}

impl Route {
    /// Control routes manage subscriptions and never fan out.
    pub fn is_control(&self) -> bool {
        !matches!(self, Route::Channel(_))
    }

    /// The user a control route acts on.
    pub fn target_user(&self) -> Option<UserId> {
        match self {
            Route::Channel(_) => None,
            Route::Subscribe { user_id, .. } | Route::Unsubscribe { user_id, .. } => Some(*user_id),
        }
    }
}

pub type Decoder = fn(&RawValue) -> Result<TypedEvent, serde_json::Error>;

#[derive(Debug, Default)]
pub struct EventHandlerRegistry {
    decoders: HashMap<EventType, Decoder>,
}

impl EventHandlerRegistry {
    /// An empty registry; nothing will route until decoders are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every event kind the hub understands.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(EventType::MessageCreate, |raw| {
            serde_json::from_str(raw.get()).map(TypedEvent::MessageCreated)
        });
        registry.register(EventType::MessageUpdate, |raw| {
            serde_json::from_str(raw.get()).map(TypedEvent::MessageUpdated)
        });
        registry.register(EventType::MessageDelete, |raw| {
            serde_json::from_str(raw.get()).map(TypedEvent::MessageDeleted)
        });
        registry.register(EventType::SubscribeChannels, |raw| {
            serde_json::from_str(raw.get()).map(TypedEvent::SubscribeChannels)
        });
        registry.register(EventType::UnsubscribeChannels, |raw| {
            serde_json::from_str(raw.get()).map(TypedEvent::UnsubscribeChannels)
        });

        tracing::debug!(count = registry.len(), "Registered event processors");
        registry
    }

    /// Register (or replace) the decoder for an event type.
    pub fn register(&mut self, kind: EventType, decoder: Decoder) {
        self.decoders.insert(kind, decoder);
    }

    pub fn is_registered(&self, kind: &EventType) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Decode the envelope's payload with the decoder selected by its type.
    pub fn decode(&self, event: &Event) -> Result<TypedEvent, HandlerError> {
        let decoder = self
            .decoders
            .get(&event.kind)
            .ok_or_else(|| HandlerError::UnknownEventType(event.kind.clone()))?;

        decoder(&event.data).map_err(|source| HandlerError::Decode {
            event_type: event.kind.clone(),
            source,
        })
    }

    /// Decode and resolve the routing key.
    pub fn route(&self, event: &Event) -> Result<Route, HandlerError> {
        Ok(self.decode(event)?.route())
    }
}
