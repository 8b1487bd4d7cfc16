//! Message Event Payloads
//!
//! Published by the message service whenever channel content changes.
//! Each payload routes by its `channel_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChannelId;

/// Denormalized sender summary attached to created messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUser {
    pub id: uuid::Uuid,
    pub name: String,
    #[serde(default)]
    pub display_id: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub id: uuid::Uuid,
    pub channel_id: ChannelId,
    pub sender_id: uuid::Uuid,
    #[serde(default)]
    pub sender: Option<MessageUser>,
    pub content: String,
    #[serde(default)]
    pub reply_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdated {
    pub id: uuid::Uuid,
    pub channel_id: ChannelId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub id: uuid::Uuid,
    pub channel_id: ChannelId,
}
