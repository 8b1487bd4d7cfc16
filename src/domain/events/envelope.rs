//! Event Envelope
//!
//! The `{type, timestamp, data}` frame shared by the WebSocket wire and the
//! upstream bus. `data` stays undecoded until `type` selects a decoder.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;

/// Event type tag carried in the envelope's `type` field.
///
/// Unknown tags are preserved in `Other` so they can be logged and dropped
/// instead of failing envelope parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    SubscribeChannels,
    UnsubscribeChannels,
    AuthRequest,
    AuthSuccess,
    AuthError,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::MessageCreate => "MESSAGE_CREATE",
            EventType::MessageUpdate => "MESSAGE_UPDATE",
            EventType::MessageDelete => "MESSAGE_DELETE",
            EventType::SubscribeChannels => "SUBSCRIBE_CHANNELS",
            EventType::UnsubscribeChannels => "UNSUBSCRIBE_CHANNELS",
            EventType::AuthRequest => "AUTH_REQUEST",
            EventType::AuthSuccess => "AUTH_SUCCESS",
            EventType::AuthError => "AUTH_ERROR",
            EventType::Other(tag) => tag,
        }
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "MESSAGE_CREATE" => EventType::MessageCreate,
            "MESSAGE_UPDATE" => EventType::MessageUpdate,
            "MESSAGE_DELETE" => EventType::MessageDelete,
            "SUBSCRIBE_CHANNELS" => EventType::SubscribeChannels,
            "UNSUBSCRIBE_CHANNELS" => EventType::UnsubscribeChannels,
            "AUTH_REQUEST" => EventType::AuthRequest,
            "AUTH_SUCCESS" => EventType::AuthSuccess,
            "AUTH_ERROR" => EventType::AuthError,
            _ => EventType::Other(tag),
        }
    }
}

impl From<EventType> for String {
    fn from(kind: EventType) -> Self {
        match kind {
            EventType::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic event envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,

    /// Set on everything the server emits; clients usually omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    pub data: Box<RawValue>,
}

impl Event {
    /// Build a server-originated envelope stamped with the current time.
    pub fn new<T: Serialize>(kind: EventType, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            timestamp: Some(Utc::now()),
            data: serde_json::value::to_raw_value(payload)?,
        })
    }

    /// Decode `data` into a concrete payload type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.data.get())
    }

    /// Serialize the whole envelope for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
