//! Server-Sent Events broadcast endpoint.
//!
//! Attaches to an axum router, upgrades `GET <path>` requests that accept
//! `text/event-stream` into long-lived streams, caps open streams per source
//! address, and tracks every stream as a client in a [`Registry`] that
//! publishes `open`, `close` and `error` events.
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use sse_broadcast::{config::SseConfig, http::attach, registry::{ClientEvent, Registry}};
//!
//! let registry = Registry::new(SseConfig::default());
//! // A weak handle, so the listener does not keep the registry alive.
//! let writer = registry.downgrade();
//! registry.subscribe(move |event| {
//!     if let ClientEvent::Open { id, .. } = event {
//!         if let Some(stream) = writer.upgrade().and_then(|r| r.stream(id)) {
//!             let _ = stream.write("event: hello\ndata: welcome\n\n");
//!         }
//!     }
//! });
//!
//! let app: Router = attach(
//!     Router::new().route("/", get(|| async { "home" })).fallback(|| async { "404" }),
//!     registry,
//! );
//! ```

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod security;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::Registry;
