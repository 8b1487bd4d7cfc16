//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Redis configuration (upstream event bus)
    pub redis: RedisSettings,

    /// Upstream bus subscription settings
    pub bus: BusSettings,

    /// JWT verification settings
    pub jwt: JwtSettings,

    /// WebSocket connection limits and liveness timings
    pub websocket: WebSocketSettings,

    /// Hub control loop settings
    pub hub: HubSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,

    /// Timeout for the startup connectivity check in seconds
    pub connect_timeout_secs: u64,
}

/// Upstream pub/sub subscription settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    /// Topic pattern subscribed with PSUBSCRIBE (e.g. "message:*")
    pub pattern: String,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Shared HMAC secret used by the issuing service
    pub secret: String,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum inbound message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum inbound frame size in bytes (default: 64KB)
    pub max_frame_size: usize,

    /// Deadline for the client to send its auth frame
    pub auth_timeout_secs: u64,

    /// Read deadline, renewed by every pong
    pub pong_wait_secs: u64,

    /// Keepalive ping period, must be shorter than `pong_wait_secs`
    pub ping_period_secs: u64,

    /// Deadline for a single socket write
    pub write_wait_secs: u64,

    /// Capacity of each connection's outbound queue
    pub send_buffer: usize,
}

/// Hub control loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    /// Capacity of the Hub's command inbox
    pub command_buffer: usize,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (empty means any origin)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the resulting values are inconsistent.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        let redis_url = std::env::var("REDIS_URL").ok().or_else(|| {
            std::env::var("REDIS_ADDR")
                .ok()
                .map(|addr| format!("redis://{}", addr))
        });

        let port = std::env::var("SERVER_PORT")
            .ok()
            .or_else(|| std::env::var("REALTIME_SERVICE_PORT").ok());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 50053)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("redis.connect_timeout_secs", 5)?
            .set_default("bus.pattern", crate::infrastructure::bus::MESSAGE_EVENT_PATTERN)?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 65536_i64)?
            .set_default("websocket.auth_timeout_secs", 5)?
            .set_default("websocket.pong_wait_secs", 60)?
            .set_default("websocket.ping_period_secs", 54)?
            .set_default("websocket.write_wait_secs", 10)?
            .set_default("websocket.send_buffer", 256)?
            .set_default("hub.command_buffer", 1024)?
            .set_default("cors.allowed_origins", Vec::<String>::new())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__WEBSOCKET__SEND_BUFFER=512 -> websocket.send_buffer = 512
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", port)?
            .set_override_option("redis.url", redis_url)?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Check cross-field constraints that deserialization cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }

        if self.websocket.ping_period_secs >= self.websocket.pong_wait_secs {
            return Err(ConfigError::Message(format!(
                "websocket.ping_period_secs ({}) must be shorter than websocket.pong_wait_secs ({})",
                self.websocket.ping_period_secs, self.websocket.pong_wait_secs
            )));
        }

        if self.websocket.send_buffer == 0 || self.hub.command_buffer == 0 {
            return Err(ConfigError::Message(
                "websocket.send_buffer and hub.command_buffer must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketSettings {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_message_size: 64 << 10,
            max_frame_size: 64 << 10,
            auth_timeout_secs: 5,
            pong_wait_secs: 60,
            ping_period_secs: 54,
            write_wait_secs: 10,
            send_buffer: 256,
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_buffer: 1024,
        }
    }
}
