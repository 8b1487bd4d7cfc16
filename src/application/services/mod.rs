//! Application Services
//!
//! Business logic shared by the presentation layer.

pub mod token_service;

pub use token_service::{Claims, TokenVerifier};
