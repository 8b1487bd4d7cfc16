//! # Realtime Hub Library
//!
//! WebSocket fan-out service for the chat backend:
//! - Authenticated WebSocket connections, one per user
//! - Channel subscriptions managed over the socket or the bus
//! - Events from the Redis pub/sub bus delivered to every subscriber
//!
//! ## Module Structure
//!
//! ```text
//! realtime_hub/
//! +-- config/         Configuration management
//! +-- domain/         Event envelope and payload types
//! +-- application/    Token verification
//! +-- infrastructure/ Redis bus bridge and metrics
//! +-- presentation/   HTTP routes, middleware and the WebSocket hub
//! +-- shared/         Error types
//! ```

// Configuration module
pub mod config;

// Domain layer - Event types
pub mod domain;

// Application layer - Services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
