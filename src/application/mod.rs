//! Application Layer
//!
//! Services that sit between the wire and the domain types.

pub mod services;
