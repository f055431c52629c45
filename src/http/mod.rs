//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, connect info, graceful shutdown)
//!     → request.rs (request ID)
//!     → gatekeeper.rs (GET <sse path>? admit or reject : pass through)
//!         → response.rs (406/429/503, or 200 text/event-stream)
//!     → routes (health, admin, fallback)
//!
//! Open streams:
//!     keepalive.rs writes periodic comments until shutdown
//! ```

pub mod gatekeeper;
pub mod keepalive;
pub mod request;
pub mod response;
pub mod server;

pub use gatekeeper::{attach, gatekeeper};
pub use request::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use server::{build_router, HttpServer};
