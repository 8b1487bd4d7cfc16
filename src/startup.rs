//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::TokenVerifier;
use crate::config::Settings;
use crate::infrastructure::bus::{self, Subscriber};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{Hub, HubHandle};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub tokens: TokenVerifier,
    pub redis: redis::Client,
    pub settings: Arc<Settings>,
}

/// Build the router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors_layer = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(logging::create_trace_layer())
        .layer(cors_layer)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    hub: JoinHandle<()>,
    subscriber: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application from settings
    ///
    /// Fails if Redis cannot be reached; the service is useless without its
    /// event source.
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();
        let shutdown = CancellationToken::new();

        // Create Redis client
        let redis = bus::create_redis_client(&settings.redis).await?;

        // Start the hub loop
        let (hub, hub_handle) = Hub::new(&settings.hub, shutdown.clone());
        let hub = tokio::spawn(hub.run());

        // Start the bus subscriber; it resubscribes on its own if Redis drops
        let subscriber = Subscriber::new(redis.clone(), hub_handle.clone(), &settings.bus.pattern);
        let subscriber = tokio::spawn(subscriber.start(shutdown.clone()));

        // Create app state
        let state = AppState {
            hub: hub_handle,
            tokens: TokenVerifier::new(&settings.jwt.secret),
            redis,
            settings: Arc::new(settings.clone()),
        };

        let router = build_router(state);

        // Bind to address
        let listener = TcpListener::bind(settings.server_addr()).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            hub,
            subscriber,
            shutdown,
        })
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal(self.shutdown.clone()))
            .await?;

        self.shutdown.cancel();
        if let Err(e) = self.subscriber.await {
            tracing::error!(error = %e, "Subscriber task failed");
        }
        if let Err(e) = self.hub.await {
            tracing::error!(error = %e, "Hub task failed");
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops the hub, the subscriber and the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Resolves on Ctrl+C, SIGTERM or cancellation, then cancels `token` so the
/// hub closes every connection and graceful shutdown can complete.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
        () = token.cancelled() => tracing::info!("Shutdown requested"),
    }

    token.cancel();
}
