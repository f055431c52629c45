//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header::ACCEPT, Request};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sse_broadcast::config::ServerConfig;
use sse_broadcast::http::HttpServer;
use sse_broadcast::lifecycle::Shutdown;
use sse_broadcast::registry::{ClientEvent, Registry};

pub const EVENT_STREAM: &str = "text/event-stream";

/// A request as seen from `peer`, the way axum's connect info would carry it.
pub fn request_from(peer: &str, uri: &str) -> axum::http::request::Builder {
    let addr: SocketAddr = peer.parse().unwrap();
    Request::builder().uri(uri).extension(ConnectInfo(addr))
}

/// `GET <uri>` with `Accept: text/event-stream` from `peer`.
pub fn sse_request(peer: &str, uri: &str) -> Request<Body> {
    request_from(peer, uri)
        .header(ACCEPT, EVENT_STREAM)
        .body(Body::empty())
        .unwrap()
}

/// Running server on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Registry,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a server with `config`, bound to 127.0.0.1 on a free port.
pub async fn start_server(mut config: ServerConfig) -> TestServer {
    config.listener.bind_address = "127.0.0.1:0".into();
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = HttpServer::new(config);
    let registry = server.registry().clone();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();

    let handle = tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        registry,
        shutdown,
        handle,
    }
}

/// Next event, or panic after a few seconds.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
