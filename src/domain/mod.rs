//! # Domain Layer
//!
//! Wire-level event types exchanged with clients and the upstream bus.

pub mod events;

pub use events::{ChannelId, Event, EventType, UserId};
