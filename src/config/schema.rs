//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the SSE server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// SSE endpoint and client registry settings.
    pub sse: SseConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// SSE endpoint configuration.
///
/// Handed to the [`Registry`](crate::registry::Registry) at construction and
/// never changed afterwards.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SseConfig {
    /// Route path the endpoint answers on.
    pub path: String,

    /// Which `Origin` values get an `Access-Control-Allow-Origin` header.
    pub allow_origin: AllowOrigin,

    /// Maximum open streams per source IP. Values below 1 disable the cap.
    pub limit_by_ip: i64,

    /// Emit `Access-Control-Allow-Credentials: true` on accepted streams.
    pub with_credentials: bool,

    /// Interval for keep-alive comments written by the server binary (0 = off).
    pub keepalive_secs: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            path: "/sse".to_string(),
            allow_origin: AllowOrigin::Disabled,
            limit_by_ip: 256,
            with_credentials: false,
            keepalive_secs: 15,
        }
    }
}

impl SseConfig {
    /// The per-address cap, or `None` when it is disabled.
    pub fn address_cap(&self) -> Option<usize> {
        if self.limit_by_ip >= 1 {
            Some(self.limit_by_ip as usize)
        } else {
            None
        }
    }
}

/// Allow-origin policy for accepted streams.
///
/// In TOML this is either absent, the string `"*"`, a single origin string,
/// or a list of origins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Option<OriginRepr>", into = "Option<OriginRepr>")]
pub enum AllowOrigin {
    /// No CORS header is ever emitted.
    #[default]
    Disabled,
    /// Any origin is echoed back.
    Any,
    /// Only origins in the list (exact match) are echoed back.
    List(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum OriginRepr {
    One(String),
    Many(Vec<String>),
}

impl From<Option<OriginRepr>> for AllowOrigin {
    fn from(repr: Option<OriginRepr>) -> Self {
        match repr {
            None => AllowOrigin::Disabled,
            Some(OriginRepr::One(origin)) if origin == "*" => AllowOrigin::Any,
            Some(OriginRepr::One(origin)) => AllowOrigin::List(vec![origin]),
            Some(OriginRepr::Many(origins)) => AllowOrigin::List(origins),
        }
    }
}

impl From<AllowOrigin> for Option<OriginRepr> {
    fn from(policy: AllowOrigin) -> Self {
        match policy {
            AllowOrigin::Disabled => None,
            AllowOrigin::Any => Some(OriginRepr::One("*".to_string())),
            AllowOrigin::List(origins) => Some(OriginRepr::Many(origins)),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to produce response headers, in seconds.
    /// Stream bodies are not bounded by this.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes under `/admin`.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
