//! Event Bus Module
//!
//! Bridges the upstream Redis pub/sub bus into the Hub. Producers publish
//! envelopes to `message:<channel_id>`; this side pattern-subscribes and
//! hands every decoded envelope to the Hub in arrival order.
//!
//! ```text
//! +-------------------+      PSUBSCRIBE message:*
//! |   Redis Pub/Sub   |  ---------------------------+
//! +-------------------+                             |
//!                                                   v
//!                                         +-------------------+
//!                                         |    Subscriber     |
//!                                         +-------------------+
//!                                                   | HubHandle::broadcast
//!                                                   v
//!                                         +-------------------+
//!                                         |        Hub        |
//!                                         +-------------------+
//! ```

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use redis::Client;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::RedisSettings;
use crate::domain::Event;
use crate::presentation::websocket::HubHandle;
use crate::shared::error::BusError;

/// Pattern matching every per-channel message topic.
pub const MESSAGE_EVENT_PATTERN: &str = "message:*";

/// Opens a Redis client and checks the server answers within the
/// configured connect timeout.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(settings: &RedisSettings) -> Result<Client, BusError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    ping(&client, Duration::from_secs(settings.connect_timeout_secs)).await?;
    info!("Redis connection established");
    Ok(client)
}

/// Round-trip a PING within `deadline`.
pub async fn ping(client: &Client, deadline: Duration) -> Result<(), BusError> {
    let check = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok::<_, BusError>(())
    };

    timeout(deadline, check)
        .await
        .map_err(|_| BusError::ConnectTimeout)?
}

/// Delay between resubscribe attempts, doubled after every failure.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Pattern subscriber feeding the Hub.
pub struct Subscriber {
    client: Client,
    hub: HubHandle,
    pattern: String,
    backoff: Backoff,
}

impl Subscriber {
    pub fn new(client: Client, hub: HubHandle, pattern: impl Into<String>) -> Self {
        Self {
            client,
            hub,
            pattern: pattern.into(),
            backoff: Backoff::default(),
        }
    }

    /// Subscribe and forward until `token` is cancelled or the Hub stops.
    ///
    /// A lost subscription is re-established with backoff; it never stops
    /// the service.
    pub async fn start(self, token: CancellationToken) {
        let Self {
            client,
            hub,
            pattern,
            backoff,
        } = self;
        resubscribe(
            || subscribe(client.clone(), pattern.clone()),
            &hub,
            &token,
            backoff,
        )
        .await;
    }
}

/// Open a dedicated pub/sub connection and pattern-subscribe on it.
async fn subscribe(client: Client, pattern: String) -> Result<BoxStream<'static, Vec<u8>>, BusError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(&pattern).await?;
    info!(pattern = %pattern, "Redis subscription established");

    Ok(pubsub
        .into_on_message()
        .map(|msg| {
            debug!(topic = msg.get_channel_name(), "Bus message received");
            msg.get_payload_bytes().to_vec()
        })
        .boxed())
}

/// Keep a subscription alive: connect, forward until the stream ends, wait,
/// connect again.
///
/// Returns on cancellation or once the Hub is closed.
pub async fn resubscribe<F, Fut, S>(
    mut connect: F,
    hub: &HubHandle,
    token: &CancellationToken,
    backoff: Backoff,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, BusError>>,
    S: Stream<Item = Vec<u8>>,
{
    let mut delay = backoff.initial;

    loop {
        let connected = tokio::select! {
            () = token.cancelled() => return,
            connected = connect() => connected,
        };

        match connected {
            Ok(stream) => {
                delay = backoff.initial;
                match forward(stream, hub, token).await {
                    Ok(()) => return,
                    Err(e) => warn!(error = %e, "Redis subscription lost"),
                }
            }
            Err(e) => warn!(error = %e, "Redis subscribe failed"),
        }

        if hub.is_closed() {
            info!("Hub closed, Redis subscriber stopped");
            return;
        }

        info!(retry_in_ms = delay.as_millis() as u64, "Resubscribing to Redis");
        tokio::select! {
            () = token.cancelled() => return,
            () = sleep(delay) => {}
        }
        delay = (delay * 2).min(backoff.max);
    }
}

/// Decode each payload as an envelope and broadcast it.
///
/// Undecodable payloads are logged and skipped; envelopes without a
/// timestamp are stamped on arrival. Returns `Ok` on
/// cancellation or when the Hub is closed, and
/// [`BusError::Disconnected`] when the stream ends on its own.
pub async fn forward<S>(stream: S, hub: &HubHandle, token: &CancellationToken) -> Result<(), BusError>
where
    S: Stream<Item = Vec<u8>>,
{
    let mut stream = std::pin::pin!(stream);

    loop {
        let payload = tokio::select! {
            () = token.cancelled() => {
                info!("Redis subscriber stopped");
                return Ok(());
            }
            payload = stream.next() => payload,
        };

        let Some(payload) = payload else {
            return Err(BusError::Disconnected);
        };

        let mut event: Event = match serde_json::from_slice(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Error unmarshaling event");
                continue;
            }
        };

        event.timestamp.get_or_insert_with(Utc::now);

        if hub.broadcast(event).await.is_err() {
            info!("Hub closed, Redis subscriber stopped");
            return Ok(());
        }
    }
}
