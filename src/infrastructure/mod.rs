//! Infrastructure Layer
//!
//! Adapters to external services:
//! - Upstream event bus (Redis pub/sub)
//! - Prometheus metrics

pub mod bus;
pub mod metrics;
