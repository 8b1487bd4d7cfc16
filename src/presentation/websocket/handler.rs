//! WebSocket Connection Handler
//!
//! Upgrades the request, runs the auth handshake on the raw socket and hands
//! authenticated connections to the Hub and the connection pumps.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use serde::Serialize;
use tokio::time::timeout;

use super::client::Client;
use super::connection::{serve, ConnectionTiming};
use crate::application::services::TokenVerifier;
use crate::domain::events::{AuthFailure, AuthRequest, AuthSuccess, Event, EventType};
use crate::domain::UserId;
use crate::shared::error::AuthError;
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_message_size = state.settings.websocket.max_message_size;
    let max_frame_size = state.settings.websocket.max_frame_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let settings = &state.settings.websocket;

    let user_id = match authenticate(&mut socket, &state.tokens, settings.auth_timeout()).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::debug!(error = ?e, "WebSocket authentication failed");
            reject(&mut socket, &e, settings.write_wait()).await;
            return;
        }
    };

    if let Err(e) = send_event(
        &mut socket,
        EventType::AuthSuccess,
        &AuthSuccess { user_id },
        settings.write_wait(),
    )
    .await
    {
        tracing::debug!(user_id = %user_id, error = %e, "Failed to send AUTH_SUCCESS");
        return;
    }

    let (client, outbound) = Client::new(user_id, settings.send_buffer);
    if state.hub.register(Arc::clone(&client)).await.is_err() {
        tracing::warn!(user_id = %user_id, "Hub is closed, dropping connection");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    tracing::info!(
        user_id = %user_id,
        connection_id = %client.id(),
        "User connected and authenticated"
    );

    serve(
        socket,
        Arc::clone(&client),
        outbound,
        state.hub.clone(),
        ConnectionTiming::from(settings),
    )
    .await;

    tracing::info!(
        user_id = %user_id,
        connection_id = %client.id(),
        "User disconnected"
    );
}

/// Wait for the AUTH_REQUEST frame and verify its token.
async fn authenticate(
    socket: &mut WebSocket,
    tokens: &TokenVerifier,
    deadline: Duration,
) -> Result<UserId, AuthError> {
    let text = timeout(deadline, next_text(socket))
        .await
        .map_err(|_| AuthError::Timeout)??;

    let event: Event =
        serde_json::from_str(text.as_str()).map_err(|e| AuthError::Malformed(e.to_string()))?;

    if event.kind != EventType::AuthRequest {
        return Err(AuthError::UnexpectedType(event.kind));
    }

    let request: AuthRequest = event.decode().map_err(|_| AuthError::InvalidData)?;
    tokens.verify(&request.token)
}

/// Next text frame, skipping control frames.
async fn next_text(socket: &mut WebSocket) -> Result<Utf8Bytes, AuthError> {
    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(Message::Text(text)) => return Ok(text),
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                return Err(AuthError::Malformed("binary frame".into()));
            }
            Ok(Message::Close(_)) => return Err(AuthError::Closed),
            Err(e) => return Err(AuthError::Malformed(e.to_string())),
        }
    }
    Err(AuthError::Closed)
}

/// Send AUTH_ERROR and close the socket.
async fn reject(socket: &mut WebSocket, error: &AuthError, write_wait: Duration) {
    if matches!(error, AuthError::Closed) {
        return;
    }

    let failure = AuthFailure {
        message: error.to_string(),
    };
    if let Err(e) = send_event(socket, EventType::AuthError, &failure, write_wait).await {
        tracing::debug!(error = %e, "Failed to send AUTH_ERROR");
    }
    let _ = timeout(write_wait, socket.send(Message::Close(None))).await;
}

async fn send_event<T: Serialize>(
    socket: &mut WebSocket,
    kind: EventType,
    payload: &T,
    write_wait: Duration,
) -> anyhow::Result<()> {
    let json = Event::new(kind, payload)?.to_json()?;
    timeout(write_wait, socket.send(Message::Text(json.into()))).await??;
    Ok(())
}
