//! WebSocket Hub
//!
//! Connection handshake, per-connection pumps and the Hub that fans events
//! out to subscribed connections.

pub mod client;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod registry;
pub mod subscription;

pub use client::{Client, ConnectionId, EnqueueError};
pub use connection::{CloseGuard, ConnectionTiming};
pub use handler::ws_handler;
pub use hub::{Hub, HubHandle, HubStats};
pub use registry::{EventHandlerRegistry, Route, TypedEvent};
pub use subscription::SubscriptionManager;
