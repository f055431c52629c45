//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the host Axum Router (health, admin, fallback)
//! - Attach the SSE gatekeeper in front of every route
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve with graceful shutdown, closing open streams first
//! - Run the keep-alive task

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ServerConfig;
use crate::http::gatekeeper;
use crate::http::keepalive;
use crate::http::request::{RequestId, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::registry::Registry;

/// HTTP server hosting the SSE endpoint.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
    registry: Registry,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Registry::new(config.sse.clone());
        let router = build_router(&config, registry.clone());
        Self {
            router,
            config,
            registry,
        }
    }

    /// Handle to the client registry, for publishing to clients and
    /// subscribing to lifecycle events.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            sse_path = %self.registry.path(),
            limit_by_ip = self.registry.limit_by_ip(),
            "HTTP server starting"
        );

        if self.config.sse.keepalive_secs > 0 {
            let interval = Duration::from_secs(self.config.sse.keepalive_secs);
            tokio::spawn(keepalive::run(
                self.registry.clone(),
                interval,
                shutdown.subscribe(),
            ));
        }

        let registry = self.registry.clone();
        let mut shutdown_rx = shutdown.subscribe();
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        // Streams never finish on their own, so close them before draining.
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                let closed = registry.close_all();
                tracing::info!(closed, "Closed open SSE streams for shutdown");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with the gatekeeper and all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ServerConfig, registry: Registry) -> Router {
    let mut router = Router::new().route("/health", get(health));

    if config.admin.enabled {
        router = router.merge(setup_admin_router(AdminState {
            registry: registry.clone(),
            api_key: config.admin.api_key.clone(),
        }));
    }

    let router = router.fallback(not_found);

    gatekeeper::attach(router, registry).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, RequestId))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
    )
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
