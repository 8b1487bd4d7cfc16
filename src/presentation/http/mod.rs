//! HTTP Routes
//!
//! Router assembly and the operational HTTP handlers.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
