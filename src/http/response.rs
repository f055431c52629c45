//! Response construction for the SSE endpoint.
//!
//! # Responsibilities
//! - Build the `200 text/event-stream` head for accepted streams
//! - Build terminal rejections (406, 429, 503) that close the connection
//!
//! # Design Decisions
//! - Rejections carry `Connection: close`; the client is expected to fix the
//!   request and reconnect on its own
//! - Stream bodies are never buffered

use axum::body::Body;
use axum::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::registry::ClientBody;

pub const EVENT_STREAM: &str = "text/event-stream";

/// A terminal response for a request the gatekeeper refused.
pub fn reject(status: StatusCode) -> Response {
    let reason = status.canonical_reason().unwrap_or("Rejected");
    let mut response = (status, reason).into_response();
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// The open-ended response for an accepted stream.
pub fn event_stream(body: ClientBody, extra_headers: HeaderMap) -> Response {
    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.extend(extra_headers);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
