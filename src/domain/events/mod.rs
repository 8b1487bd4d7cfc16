//! Realtime Events
//!
//! Wire envelope plus the typed payloads the hub knows how to route.

mod control;
mod envelope;
mod message;

pub use control::{AuthFailure, AuthRequest, AuthSuccess, ChannelSubscription};
pub use envelope::{Event, EventType};
pub use message::{MessageCreated, MessageDeleted, MessageUpdated, MessageUser};

/// Identifier of a conversation channel.
pub type ChannelId = uuid::Uuid;

/// Stable user identifier extracted from the credential.
pub type UserId = uuid::Uuid;
