//! Cross-origin headers for accepted streams.
//!
//! # Design Decisions
//! - The request's own origin is echoed back, even for `*`, so credentialed
//!   requests keep working
//! - List membership is exact: no prefix, suffix or case folding

use axum::http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN,
};

use crate::config::AllowOrigin;

/// Whether `origin` passes the policy.
pub fn origin_allowed(policy: &AllowOrigin, origin: &str) -> bool {
    match policy {
        AllowOrigin::Disabled => false,
        AllowOrigin::Any => true,
        AllowOrigin::List(origins) => origins.iter().any(|allowed| allowed == origin),
    }
}

/// CORS response headers for a request carrying `request_headers`.
pub fn cors_headers(
    policy: &AllowOrigin,
    with_credentials: bool,
    request_headers: &HeaderMap,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(origin) = request_headers.get(ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|origin| origin_allowed(policy, origin))
            .unwrap_or(false);
        if allowed {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }
    }

    if with_credentials {
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(origin: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert(ORIGIN, HeaderValue::from_static(origin));
        }
        headers
    }

    #[test]
    fn list_requires_exact_match() {
        let policy = AllowOrigin::List(vec!["https://a.example".into()]);
        assert!(origin_allowed(&policy, "https://a.example"));
        assert!(!origin_allowed(&policy, "https://a.example.evil"));
        assert!(!origin_allowed(&policy, "https://A.example"));
        assert!(!origin_allowed(&policy, "a.example"));
    }

    #[test]
    fn wildcard_echoes_request_origin() {
        let headers = cors_headers(&AllowOrigin::Any, false, &request(Some("https://b.example")));
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://b.example");
        assert!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }

    #[test]
    fn disabled_policy_emits_nothing() {
        let headers = cors_headers(&AllowOrigin::Disabled, false, &request(Some("https://a.example")));
        assert!(headers.is_empty());
    }

    #[test]
    fn missing_origin_emits_no_allow_origin() {
        let headers = cors_headers(&AllowOrigin::Any, true, &request(None));
        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
