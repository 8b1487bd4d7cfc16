//! HTTP Handlers
//!
//! Operational endpoints served next to the WebSocket route.

pub mod health;
