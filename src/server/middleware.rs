//! Middleware for request logging, CORS and panic recovery

use crate::config::CorsConfig;
use axum::{
    extract::Request,
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::any::Any;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any as AnyOrigin, CorsLayer};
use tracing::{error, info, warn};

/// Request logging middleware
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), ?elapsed, "request failed");
    } else {
        info!(%method, %path, status = status.as_u16(), ?elapsed, "request completed");
    }

    response
}

/// Turn a handler panic into a JSON 500 instead of dropping the connection
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "Internal Server Error",
            "message": "The server encountered an internal error and was unable to complete your request."
        })),
    )
        .into_response()
}

/// Does `origin` match an allow-list entry?
///
/// Entries are exact origins or `scheme://*.domain`, which accepts any
/// subdomain of `domain` over the same scheme (but not `domain` itself).
pub fn origin_matches(pattern: &str, origin: &str) -> bool {
    if pattern == origin {
        return true;
    }

    let Some((scheme, host_pattern)) = pattern.split_once("://") else {
        return false;
    };
    let Some(domain) = host_pattern.strip_prefix("*.") else {
        return false;
    };
    let Some(host) = origin
        .strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
    else {
        return false;
    };

    match host.strip_suffix(domain).and_then(|h| h.strip_suffix('.')) {
        Some(subdomain) => !subdomain.is_empty() && !subdomain.contains('/'),
        None => false,
    }
}

/// CORS layer built from the configured allow-list
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(config.max_age));

    if config.allowed_origins.iter().any(|o| o == "*") {
        // Credentials are never allowed with a wildcard origin
        return cors.allow_origin(AnyOrigin).allow_credentials(false);
    }

    let patterns = config.allowed_origins.clone();
    cors.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _parts: &Parts| {
            origin
                .to_str()
                .map(|origin| patterns.iter().any(|p| origin_matches(p, origin)))
                .unwrap_or(false)
        },
    ))
    .allow_credentials(config.allow_credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_origin() {
        assert!(origin_matches("http://localhost:5173", "http://localhost:5173"));
        assert!(!origin_matches("http://localhost:5173", "http://localhost:5174"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let pattern = "https://*.vercel.app";
        assert!(origin_matches(pattern, "https://medalze-git-main.vercel.app"));
        assert!(origin_matches(pattern, "https://a.b.vercel.app"));
        assert!(!origin_matches(pattern, "https://vercel.app"));
        assert!(!origin_matches(pattern, "http://preview.vercel.app"));
        assert!(!origin_matches(pattern, "https://evilvercel.app"));
        assert!(!origin_matches(pattern, "https://vercel.app.evil.com"));
    }

    #[test]
    fn test_panic_response_is_json_500() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
