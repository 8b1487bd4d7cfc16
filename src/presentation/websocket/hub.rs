//! Realtime Hub
//!
//! Single authoritative coordinator for connection membership and event
//! delivery. One task owns the connection table and drains one FIFO
//! command queue; every registration, unregistration, broadcast and
//! client-issued control event goes through that queue, so the table needs
//! no lock. Everything else talks to the loop through a [`HubHandle`].
//!
//! Delivery never waits on a consumer: a client whose outbound queue is full
//! is evicted instead of stalling the loop.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{Client, EnqueueError};
use super::registry::{EventHandlerRegistry, Route};
use super::subscription::SubscriptionManager;
use crate::config::HubSettings;
use crate::domain::{ChannelId, Event, UserId};
use crate::infrastructure::metrics;
use crate::shared::error::{HandlerError, HubError};

/// Commands processed by the Hub loop, in arrival order.
enum Command {
    Register(Arc<Client>),
    Unregister(Arc<Client>),
    /// Event from the upstream bus.
    Broadcast(Event),
    /// Event sent by a connected client over its socket.
    Inbound { client: Arc<Client>, event: Event },
    Stats(oneshot::Sender<HubStats>),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Register(_) => "register",
            Command::Unregister(_) => "unregister",
            Command::Broadcast(_) => "broadcast",
            Command::Inbound { .. } => "inbound",
            Command::Stats(_) => "stats",
        }
    }
}

/// Point-in-time counters answered by the Hub loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub channels: usize,
}

pub struct Hub {
    clients: HashMap<UserId, Arc<Client>>,
    subscriptions: Arc<SubscriptionManager>,
    handlers: EventHandlerRegistry,
    cmd_rx: mpsc::Receiver<Command>,
    token: CancellationToken,
}

impl Hub {
    /// Create a hub with the default event registry.
    ///
    /// The hub stops when `token` (or the handle's own token, a child of it)
    /// is cancelled. Call and spawn [`run`](Self::run) to start processing.
    pub fn new(settings: &HubSettings, token: CancellationToken) -> (Self, HubHandle) {
        Self::with_registry(settings, token, EventHandlerRegistry::with_defaults())
    }

    pub fn with_registry(
        settings: &HubSettings,
        token: CancellationToken,
        handlers: EventHandlerRegistry,
    ) -> (Self, HubHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(settings.command_buffer);
        let subscriptions = Arc::new(SubscriptionManager::new());
        let token = token.child_token();

        let handle = HubHandle {
            cmd_tx,
            subscriptions: Arc::clone(&subscriptions),
            token: token.clone(),
        };

        (
            Self {
                clients: HashMap::new(),
                subscriptions,
                handlers,
                cmd_rx,
                token,
            },
            handle,
        )
    }

    pub async fn run(mut self) {
        info!("Hub started");

        loop {
            let command = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    debug!("Hub was cancelled");
                    break;
                }
                command = self.cmd_rx.recv() => command,
            };

            let Some(command) = command else { break };
            tracing::trace!(command = command.name(), "Processing hub command");
            self.process(command);
        }

        self.shutdown();
        info!("Hub stopped");
    }

    fn process(&mut self, command: Command) {
        match command {
            Command::Register(client) => self.register(client),
            Command::Unregister(client) => self.unregister(&client),
            Command::Broadcast(event) => {
                metrics::message_received();
                self.handle_event(&event, None);
            }
            Command::Inbound { client, event } => self.handle_event(&event, Some(&client)),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Insert the client keyed by identity. A previous connection for the
    /// same identity is closed and its subscriptions cleared first.
    fn register(&mut self, client: Arc<Client>) {
        let user_id = client.user_id();

        if let Some(previous) = self.clients.insert(user_id, Arc::clone(&client)) {
            previous.close_queue();
            self.subscriptions.unsubscribe_all(&previous);
            metrics::connection_closed();
            info!(
                user_id = %user_id,
                connection_id = %previous.id(),
                "Previous connection superseded"
            );
        }

        metrics::connection_opened();
        info!(user_id = %user_id, connection_id = %client.id(), "Client registered");
    }

    fn unregister(&mut self, client: &Arc<Client>) {
        if self.is_current(client) {
            self.clients.remove(&client.user_id());
            self.subscriptions.unsubscribe_all(client);
            metrics::connection_closed();
            info!(
                user_id = %client.user_id(),
                connection_id = %client.id(),
                "Client unregistered"
            );
        }

        // Evicted or superseded clients were cleaned up when that happened.
        client.close_queue();
    }

    fn is_current(&self, client: &Client) -> bool {
        self.clients
            .get(&client.user_id())
            .is_some_and(|current| current.id() == client.id())
    }

    fn handle_event(&mut self, event: &Event, origin: Option<&Arc<Client>>) {
        let route = match self.handlers.route(event) {
            Ok(route) => route,
            Err(e) => {
                warn!(event_type = %event.kind, error = %e, "Error handling event");
                return;
            }
        };

        if let Some(client) = origin {
            if let Err(e) = authorize(client, &route) {
                warn!(
                    user_id = %client.user_id(),
                    event_type = %event.kind,
                    error = %e,
                    "Dropping client event"
                );
                return;
            }
        }

        match route {
            Route::Channel(channel_id) => {
                self.broadcast_to_channel(channel_id, event);
            }
            Route::Subscribe {
                user_id,
                channel_ids,
            } => {
                let Some(target) = self.resolve_target(user_id, origin) else {
                    debug!(user_id = %user_id, "Client not connected, dropping subscribe");
                    return;
                };
                for channel_id in channel_ids {
                    self.subscriptions.subscribe_channel(&target, channel_id);
                    debug!(user_id = %user_id, channel_id = %channel_id, "Client subscribed to channel");
                }
            }
            Route::Unsubscribe {
                user_id,
                channel_ids,
            } => {
                let Some(target) = self.resolve_target(user_id, origin) else {
                    debug!(user_id = %user_id, "Client not connected, dropping unsubscribe");
                    return;
                };
                for channel_id in channel_ids {
                    self.subscriptions.unsubscribe_channel(&target, channel_id);
                    debug!(user_id = %user_id, channel_id = %channel_id, "Client unsubscribed from channel");
                }
            }
        }
    }

    /// The registered connection a control event applies to. A client can
    /// only act on itself, and only while it is still the registered one.
    fn resolve_target(&self, user_id: UserId, origin: Option<&Arc<Client>>) -> Option<Arc<Client>> {
        let current = self.clients.get(&user_id)?;
        match origin {
            Some(client) if client.id() != current.id() => None,
            _ => Some(Arc::clone(current)),
        }
    }

    /// Serialize once and enqueue to every subscriber without waiting.
    /// Returns the number of clients the event was enqueued for.
    fn broadcast_to_channel(&mut self, channel_id: ChannelId, event: &Event) -> usize {
        let subscribers = self.subscriptions.get_subscribers(&channel_id);
        if subscribers.is_empty() {
            debug!(channel_id = %channel_id, "No subscribers for channel");
            return 0;
        }

        let message = match event.to_json() {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                warn!(event_type = %event.kind, error = %e, "Error marshaling event");
                return 0;
            }
        };

        let mut delivered = 0;
        for client in &subscribers {
            match client.try_enqueue(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::message_sent();
                }
                Err(reason) => self.evict(client, reason),
            }
        }

        debug!(
            event_type = %event.kind,
            channel_id = %channel_id,
            subscribers = subscribers.len(),
            delivered,
            "Broadcasted event"
        );
        delivered
    }

    /// Drop a client that cannot take more messages. Its write loop sees the
    /// closed queue and shuts the socket.
    fn evict(&mut self, client: &Arc<Client>, reason: EnqueueError) {
        client.close_queue();
        if self.is_current(client) {
            self.clients.remove(&client.user_id());
            metrics::connection_closed();
        }
        self.subscriptions.unsubscribe_all(client);
        metrics::client_evicted();

        warn!(
            user_id = %client.user_id(),
            connection_id = %client.id(),
            reason = ?reason,
            "Failed to send to client, evicted"
        );
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.clients.len(),
            channels: self.subscriptions.channel_count(),
        }
    }

    /// Stop accepting commands and close every outbound queue so each write
    /// loop sends a close frame and exits.
    fn shutdown(&mut self) {
        self.cmd_rx.close();

        while let Ok(command) = self.cmd_rx.try_recv() {
            match command {
                Command::Register(client)
                | Command::Unregister(client)
                | Command::Inbound { client, .. } => {
                    client.close_queue();
                }
                Command::Broadcast(_) | Command::Stats(_) => {}
            }
        }

        let drained = self.clients.len();
        for (_, client) in self.clients.drain() {
            client.close_queue();
            self.subscriptions.unsubscribe_all(&client);
            metrics::connection_closed();
        }

        info!(connections = drained, "Hub drained connections");
    }
}

fn authorize(client: &Client, route: &Route) -> Result<(), HandlerError> {
    match route.target_user() {
        None => Err(HandlerError::Rejected(
            "clients cannot publish fan-out events".into(),
        )),
        Some(user_id) if user_id != client.user_id() => Err(HandlerError::Rejected(format!(
            "client {} cannot manage subscriptions of {}",
            client.user_id(),
            user_id
        ))),
        Some(_) => Ok(()),
    }
}

/// Cloneable sender side of the Hub loop.
#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<Command>,
    subscriptions: Arc<SubscriptionManager>,
    token: CancellationToken,
}

impl HubHandle {
    pub async fn register(&self, client: Arc<Client>) -> Result<(), HubError> {
        self.send(Command::Register(client)).await
    }

    pub async fn unregister(&self, client: Arc<Client>) -> Result<(), HubError> {
        self.send(Command::Unregister(client)).await
    }

    /// Enqueue an externally sourced event. Waits only while the Hub inbox
    /// is at capacity.
    pub async fn broadcast(&self, event: Event) -> Result<(), HubError> {
        self.send(Command::Broadcast(event)).await
    }

    /// Hand an event received from `client`'s socket to the Hub.
    pub async fn submit(&self, client: Arc<Client>, event: Event) -> Result<(), HubError> {
        self.send(Command::Inbound { client, event }).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Stats(reply_tx)).await?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }

    pub fn subscriber_count(&self, channel_id: &ChannelId) -> usize {
        self.subscriptions.subscriber_count(channel_id)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// Stop the Hub loop; registered connections are closed.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.cmd_tx.send(command).await.map_err(|_| HubError::Closed)
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
