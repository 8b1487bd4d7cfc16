//! Common Test Utilities
//!
//! Spins up the real router on an ephemeral port with an in-process Hub and
//! drives it over real WebSocket connections. Redis points at a closed port,
//! so nothing reaches the bus; tests inject bus events through the Hub
//! handle instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use realtime_hub::application::services::{Claims, TokenVerifier};
use realtime_hub::config::{
    BusSettings, CorsSettings, HubSettings, JwtSettings, RedisSettings, ServerSettings, Settings,
    WebSocketSettings,
};
use realtime_hub::domain::Event;
use realtime_hub::presentation::websocket::{Hub, HubHandle};
use realtime_hub::startup::{build_router, AppState};

pub const JWT_SECRET: &str = "integration-test-secret-that-is-32-bytes-plus";

/// How long a test waits for something that should happen.
pub const WAIT: Duration = Duration::from_secs(5);

/// How long a test waits to be confident something did not happen.
pub const QUIET: Duration = Duration::from_millis(300);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
        },
        redis: RedisSettings {
            url: "redis://127.0.0.1:1/".into(),
            connect_timeout_secs: 1,
        },
        bus: BusSettings {
            pattern: "message:*".into(),
        },
        jwt: JwtSettings {
            secret: JWT_SECRET.into(),
        },
        websocket: WebSocketSettings::default(),
        hub: HubSettings::default(),
        cors: CorsSettings {
            allowed_origins: Vec::new(),
        },
        environment: "test".into(),
    }
}

/// Test application builder
pub struct TestApp {
    pub addr: SocketAddr,
    pub router: Router,
    pub hub: HubHandle,
    pub shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with adjusted settings
    pub async fn spawn_with(configure: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = test_settings();
        configure(&mut settings);

        let shutdown = CancellationToken::new();
        let (hub, handle) = Hub::new(&settings.hub, shutdown.clone());
        tokio::spawn(hub.run());

        let state = AppState {
            hub: handle.clone(),
            tokens: TokenVerifier::new(&settings.jwt.secret),
            redis: redis::Client::open(settings.redis.url.as_str()).unwrap(),
            settings: Arc::new(settings),
        };
        let router = build_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn({
            let router = router.clone();
            async move {
                axum::serve(listener, router).await.unwrap();
            }
        });

        Self {
            addr,
            router,
            hub: handle,
            shutdown,
        }
    }

    /// Make a GET request to the application
    pub async fn get(&self, uri: &str) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Open a WebSocket without authenticating
    pub async fn connect(&self) -> WsClient {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        ws
    }

    /// Open a WebSocket and complete the auth handshake as `user_id`
    pub async fn connect_as(&self, user_id: Uuid) -> WsClient {
        let mut ws = self.connect().await;
        send_json(
            &mut ws,
            json!({"type": "AUTH_REQUEST", "data": {"token": token_for(user_id)}}),
        )
        .await;

        let reply = recv_json(&mut ws).await;
        assert_eq!(reply["type"], "AUTH_SUCCESS");
        assert_eq!(reply["data"]["user_id"], json!(user_id));
        ws
    }

    /// Inject an event as if it arrived from the bus
    pub async fn publish(&self, event: Value) {
        let event: Event = serde_json::from_str(&event.to_string()).unwrap();
        self.hub.broadcast(event).await.unwrap();
    }

    pub async fn wait_for_subscribers(&self, channel_id: Uuid, expected: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.hub.subscriber_count(&channel_id) != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "channel {channel_id} never reached {expected} subscribers"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.hub.stats().await.unwrap().connections != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "hub never reached {expected} connections"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Sign a token the way the user service does
pub fn token_for(user_id: Uuid) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        user_id,
        exp: now + 3600,
        iat: Some(now),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames
pub async fn recv_json(ws: &mut WsClient) -> Value {
    try_recv_json(ws, WAIT)
        .await
        .expect("expected a text frame")
}

/// Next text frame within `wait`, or `None` on timeout, close or error
pub async fn try_recv_json(ws: &mut WsClient, wait: Duration) -> Option<Value> {
    let next = async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                _ => return None,
            }
        }
        None
    };
    tokio::time::timeout(wait, next).await.ok().flatten()
}

/// Wait for the server to close the socket
pub async fn expect_closed(ws: &mut WsClient) {
    let closed = async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => return,
                _ => continue,
            }
        }
    };
    tokio::time::timeout(WAIT, closed)
        .await
        .expect("server should close the connection");
}

pub fn message_created(channel_id: Uuid, content: &str) -> Value {
    json!({
        "type": "MESSAGE_CREATE",
        "timestamp": "2024-05-01T12:00:00Z",
        "data": {
            "id": Uuid::new_v4(),
            "channel_id": channel_id,
            "sender_id": Uuid::new_v4(),
            "sender": {
                "id": Uuid::new_v4(),
                "name": "alice",
                "display_id": "alice",
                "bio": "",
                "icon_url": ""
            },
            "content": content,
            "reply_id": null,
            "created_at": "2024-05-01T12:00:00Z"
        }
    })
}

pub fn subscribe(user_id: Uuid, channel_ids: &[Uuid]) -> Value {
    json!({
        "type": "SUBSCRIBE_CHANNELS",
        "data": {"user_id": user_id, "channel_ids": channel_ids}
    })
}

pub fn unsubscribe(user_id: Uuid, channel_ids: &[Uuid]) -> Value {
    json!({
        "type": "UNSUBSCRIBE_CHANNELS",
        "data": {"user_id": user_id, "channel_ids": channel_ids}
    })
}
