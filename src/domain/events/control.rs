//! Control Payloads
//!
//! Subscription management and handshake frames. These never fan out.

use serde::{Deserialize, Serialize};

use super::{ChannelId, UserId};

/// Payload of SUBSCRIBE_CHANNELS and UNSUBSCRIBE_CHANNELS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSubscription {
    pub user_id: UserId,
    #[serde(default)]
    pub channel_ids: Vec<ChannelId>,
}

/// AUTH_REQUEST (client -> server)
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

/// AUTH_SUCCESS (server -> client)
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSuccess {
    pub user_id: UserId,
}

/// AUTH_ERROR (server -> client)
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthFailure {
    pub message: String,
}
