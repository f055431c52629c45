//! SSE admission middleware.
//!
//! Every request to the host router passes through [`gatekeeper`]. Requests
//! that are not `GET <path>` go on to the wrapped router untouched; the rest
//! are answered here and never reach a route.
//!
//! ```text
//! GET <path>
//!     → Accept != text/event-stream          → 406, connection closed
//!     → source address at its cap            → 429, connection closed
//!     → no free identifier                   → 503, connection closed
//!     → Registry::admit ok                   → 200 text/event-stream
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    body::Body,
    extract::{connect_info::MockConnectInfo, ConnectInfo, State},
    http::{header::ACCEPT, HeaderName, Method, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};

use crate::http::request::RequestIdExt;
use crate::http::response::{self, EVENT_STREAM};
use crate::observability::metrics;
use crate::registry::{ClientStream, Registry, RegistryError};
use crate::security::cors_headers;

const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

/// Attach the SSE endpoint to an existing router.
///
/// The router should have a fallback set before this is called so that the
/// middleware also sees requests for paths without a route.
pub fn attach<S>(router: Router<S>, registry: Registry) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(registry, gatekeeper))
}

/// Admission middleware. See the module docs for the decision table.
pub async fn gatekeeper(
    State(registry): State<Registry>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET || request.uri().path() != registry.path() {
        return next.run(request).await;
    }

    let request_id = request.request_id().to_string();
    let source = source_address(&request);

    let accepts_stream = request
        .headers()
        .get(ACCEPT)
        .is_some_and(|accept| accept.as_bytes() == EVENT_STREAM.as_bytes());
    if !accepts_stream {
        tracing::warn!(
            request_id = %request_id,
            source = %source,
            accept = ?request.headers().get(ACCEPT),
            "Rejecting SSE request without text/event-stream accept header"
        );
        metrics::record_admission("not_acceptable");
        return response::reject(StatusCode::NOT_ACCEPTABLE);
    }

    let last_event_id = request
        .headers()
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (stream, body) = ClientStream::channel();
    match registry.admit(stream, source, last_event_id) {
        Ok(client_id) => {
            tracing::debug!(
                request_id = %request_id,
                client_id = %client_id,
                source = %source,
                "SSE stream accepted"
            );
            metrics::record_admission("accepted");
            let headers = cors_headers(
                registry.allow_origin(),
                registry.with_credentials(),
                request.headers(),
            );
            response::event_stream(body, headers)
        }
        Err(RegistryError::AddressLimitReached { limit, .. }) => {
            tracing::warn!(
                request_id = %request_id,
                source = %source,
                limit,
                "Per-address connection limit reached"
            );
            metrics::record_admission("too_many_requests");
            response::reject(StatusCode::TOO_MANY_REQUESTS)
        }
        Err(err) => {
            tracing::error!(request_id = %request_id, source = %source, error = %err, "SSE admission failed");
            metrics::record_admission("unavailable");
            response::reject(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Peer IP of the connection carrying `request`.
fn source_address<B>(request: &Request<B>) -> IpAddr {
    let extensions = request.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| addr.ip())
        })
        .unwrap_or_else(|| {
            tracing::debug!("No connect info on request, using unspecified source address");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        })
}
