//! Connection Pumps
//!
//! After the handshake a socket is split in two: the read loop feeds client
//! events to the Hub and enforces the pong deadline, the write loop drains
//! the outbound queue and sends keepalive pings. Whichever side stops first
//! closes the connection for both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::Client;
use super::hub::HubHandle;
use crate::config::WebSocketSettings;
use crate::domain::Event;
use crate::shared::error::TransportError;

/// Liveness timings for an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTiming {
    /// Read deadline, renewed by every pong.
    pub pong_wait: Duration,
    pub ping_period: Duration,
    /// Deadline for one write (a batch of queued messages or a ping).
    pub write_wait: Duration,
}

impl From<&WebSocketSettings> for ConnectionTiming {
    fn from(settings: &WebSocketSettings) -> Self {
        Self {
            pong_wait: settings.pong_wait(),
            ping_period: settings.ping_period(),
            write_wait: settings.write_wait(),
        }
    }
}

/// Shared by both loops of one connection. Closing is idempotent; only the
/// first caller gets `true`.
#[derive(Debug, Default)]
pub struct CloseGuard {
    closed: AtomicBool,
    token: CancellationToken,
}

impl CloseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) -> bool {
        let first = self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.token.cancel();
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Run an authenticated, registered connection to completion.
///
/// Returns once both loops have stopped and the Hub has been told to
/// unregister the client.
pub async fn serve(
    socket: WebSocket,
    client: Arc<Client>,
    outbound: mpsc::Receiver<Utf8Bytes>,
    hub: HubHandle,
    timing: ConnectionTiming,
) {
    let (sink, stream) = socket.split();
    let guard = Arc::new(CloseGuard::new());

    let writer = tokio::spawn({
        let guard = Arc::clone(&guard);
        let user_id = client.user_id();
        async move {
            if let Err(e) = write_pump(sink, outbound, &guard, timing).await {
                debug!(user_id = %user_id, error = %e, "Write loop stopped");
            }
        }
    });

    read_pump(stream, &client, &hub, &guard, timing.pong_wait).await;

    if guard.close() {
        debug!(user_id = %client.user_id(), "Read loop closed the connection");
    }
    if hub.unregister(Arc::clone(&client)).await.is_err() {
        // Hub already stopped; make sure the write loop sees a closed queue.
        client.close_queue();
    }

    if let Err(e) = writer.await {
        warn!(user_id = %client.user_id(), error = %e, "Write task failed");
    }
}

/// Read client frames until the peer goes away, the pong deadline passes,
/// or the connection is closed from the write side.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    client: &Arc<Client>,
    hub: &HubHandle,
    guard: &CloseGuard,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let frame = tokio::select! {
            () = guard.closed() => break,
            frame = timeout_at(deadline, stream.next()) => frame,
        };

        let message = match frame {
            Err(_) => {
                info!(user_id = %client.user_id(), "No pong before read deadline, closing connection");
                break;
            }
            Ok(None) => {
                debug!(user_id = %client.user_id(), "Connection closed by peer");
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(user_id = %client.user_id(), error = %e, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let event = match serde_json::from_str::<Event>(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(user_id = %client.user_id(), error = %e, "Error unmarshaling client message");
                        continue;
                    }
                };
                if hub.submit(Arc::clone(client), event).await.is_err() {
                    break;
                }
            }
            Message::Pong(_) => {
                deadline = Instant::now() + pong_wait;
            }
            Message::Close(_) => {
                debug!(user_id = %client.user_id(), "Close frame received");
                break;
            }
            Message::Binary(_) => {
                debug!(user_id = %client.user_id(), "Ignoring binary frame");
            }
            // Pings are answered by the WebSocket layer.
            Message::Ping(_) => {}
        }
    }
}

/// Drain the outbound queue onto the socket and send keepalive pings.
///
/// A closed queue means the Hub dropped this client; a close frame is sent
/// before returning in every case.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    guard: &CloseGuard,
    timing: ConnectionTiming,
) -> Result<(), TransportError> {
    let mut ping = interval_at(Instant::now() + timing.ping_period, timing.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            () = guard.closed() => break Ok(()),
            message = outbound.recv() => {
                let Some(message) = message else { break Ok(()) };
                if let Err(e) = write_batch(&mut sink, message, &mut outbound, timing.write_wait).await {
                    break Err(e);
                }
            }
            _ = ping.tick() => {
                let sent = timeout(timing.write_wait, sink.send(Message::Ping(Bytes::new()))).await;
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => break Err(TransportError::from(e)),
                    Err(_) => break Err(TransportError::WriteTimeout),
                }
            }
        }
    };

    guard.close();
    let _ = timeout(timing.write_wait, sink.send(Message::Close(None))).await;

    result
}

/// Write `first` plus everything already queued behind it, then flush once.
/// Each message stays its own text frame. Returns the number written.
async fn write_batch(
    sink: &mut SplitSink<WebSocket, Message>,
    first: Utf8Bytes,
    outbound: &mut mpsc::Receiver<Utf8Bytes>,
    write_wait: Duration,
) -> Result<usize, TransportError> {
    let batch = async {
        sink.feed(Message::Text(first)).await?;
        let mut written = 1;

        for _ in 0..outbound.len() {
            let Ok(message) = outbound.try_recv() else { break };
            sink.feed(Message::Text(message)).await?;
            written += 1;
        }

        sink.flush().await?;
        Ok::<_, TransportError>(written)
    };

    timeout(write_wait, batch)
        .await
        .map_err(|_| TransportError::WriteTimeout)?
}
