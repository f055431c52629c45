//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted SSE request:
//!     → cors.rs (decide Access-Control-Allow-* headers)
//!     → Gatekeeper writes response head
//! ```
//!
//! The per-address connection cap lives in the registry, where it can be
//! checked under the same lock as the insert.

pub mod cors;

pub use cors::{cors_headers, origin_allowed};
