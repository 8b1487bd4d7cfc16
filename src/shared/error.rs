//! Error Types
//!
//! One enum per failure family of the realtime hub. None of these ever
//! escape the Hub loop; they are logged where they occur.

use crate::domain::events::EventType;

/// Handshake and credential failures. Terminal for the connection; the
/// `Display` text is what the client receives in the AUTH_ERROR frame, the
/// variant detail only goes to the log.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Failed to read auth message")]
    Timeout,

    #[error("Failed to read auth message")]
    Closed,

    #[error("Failed to read auth message")]
    Malformed(String),

    #[error("Invalid auth message")]
    UnexpectedType(EventType),

    #[error("Invalid auth data")]
    InvalidData,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,
}

/// Decode and routing failures for a single event. The event is dropped.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no processor registered for event type: {0}")]
    UnknownEventType(EventType),

    #[error("failed to decode {event_type} payload: {source}")]
    Decode {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },

    #[error("rejected client event: {0}")]
    Rejected(String),
}

/// The Hub loop has stopped and no longer accepts commands.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is closed")]
    Closed,
}

/// Upstream bus failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis connection check timed out")]
    ConnectTimeout,

    #[error("bus subscription stream ended")]
    Disconnected,
}

/// Socket write failures inside a connection's write loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("write deadline exceeded")]
    WriteTimeout,

    #[error("WebSocket error: {0}")]
    Socket(#[from] axum::Error),
}
