//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gatekeeper and registry produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (admissions, teardowns, active clients)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Client ID and source address are fields on every client log line
//! - Request ID flows from the HTTP layer into gatekeeper logs
//! - Metric calls are no-ops until a recorder is installed, so tests need
//!   no setup

pub mod logging;
pub mod metrics;
