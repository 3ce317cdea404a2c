//! Strict CORS handling.
//!
//! An `Origin` is accepted only when its host is the protected session
//! domain or a subdomain of it. Rejected origins get no CORS headers at all.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::redirect::RedirectGuard;

/// Outcome of checking a request's `Origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsCheck {
    /// No `Origin`, or the origin is the request's own.
    NotCrossOrigin,
    /// Accepted origin, with the headers to attach.
    Allowed(HeaderMap),
    /// The origin is outside the protected domain.
    Rejected,
}

/// Checks the `Origin` of a request.
///
/// `own_origin` is the origin of the resource being requested; a matching
/// `Origin` is not a cross-origin request.
#[must_use]
pub fn check_origin(guard: &RedirectGuard, headers: &HeaderMap, own_origin: Option<&str>) -> CorsCheck {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return CorsCheck::NotCrossOrigin;
    };
    let Ok(origin_str) = origin.to_str() else {
        return CorsCheck::Rejected;
    };

    if own_origin.is_some_and(|own| own.eq_ignore_ascii_case(origin_str)) {
        return CorsCheck::NotCrossOrigin;
    }

    if guard.is_safe_origin(origin_str) {
        CorsCheck::Allowed(allow_headers(origin, headers))
    } else {
        debug!(origin = origin_str, domain = guard.domain(), "Rejected CORS origin");
        CorsCheck::Rejected
    }
}

/// Returns `true` for a CORS preflight.
#[must_use]
pub fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
    method == Method::OPTIONS
        && headers.contains_key(header::ORIGIN)
        && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// The header set for an accepted origin.
fn allow_headers(origin: &HeaderValue, request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding, Origin"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("false"),
    );
    if let Some(requested) = request.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    if let Some(requested) = request.get(header::ACCESS_CONTROL_REQUEST_METHOD) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, requested.clone());
    }
    headers
}

/// Applies the strict origin check to the provider's own routes.
///
/// Accepted preflights are answered directly with `204`.
pub async fn cors_middleware(State(guard): State<RedirectGuard>, req: Request, next: Next) -> Response {
    match check_origin(&guard, req.headers(), None) {
        CorsCheck::Allowed(cors) => {
            if is_preflight(req.method(), req.headers()) {
                return (StatusCode::NO_CONTENT, cors).into_response();
            }
            let mut response = next.run(req).await;
            response.headers_mut().extend(cors);
            response
        }
        CorsCheck::NotCrossOrigin | CorsCheck::Rejected => next.run(req).await,
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http, middleware, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn guard() -> RedirectGuard {
        RedirectGuard::new("example.com")
    }

    fn app() -> Router {
        Router::new()
            .route("/api/health", get(|| async { "OK" }))
            .layer(middleware::from_fn_with_state(guard(), cors_middleware))
    }

    #[tokio::test]
    async fn test_preflight_from_subdomain() {
        let response = app()
            .oneshot(
                http::Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/health")
                    .header(header::ORIGIN, "https://app.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let h = response.headers();
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(h[header::VARY], "Accept-Encoding, Origin");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "false");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_HEADERS], "authorization");
        assert_eq!(h[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");
    }

    #[tokio::test]
    async fn test_lookalike_origin_gets_no_headers() {
        for origin in ["https://example.com.evil.com", "https://evilexample.com", "http://app.example.com"] {
            let response = app()
                .oneshot(
                    http::Request::builder()
                        .uri("/api/health")
                        .header(header::ORIGIN, origin)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(
                response
                    .headers()
                    .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                    .is_none(),
                "{origin}"
            );
        }
    }

    #[tokio::test]
    async fn test_simple_request_gets_headers() {
        let response = app()
            .oneshot(
                http::Request::builder()
                    .uri("/api/health")
                    .header(header::ORIGIN, "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://example.com"
        );
    }

    #[test]
    fn test_same_origin_is_not_cors() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.com"));
        assert_eq!(
            check_origin(&guard(), &headers, Some("https://evil.com")),
            CorsCheck::NotCrossOrigin
        );
        assert_eq!(check_origin(&guard(), &headers, None), CorsCheck::Rejected);
        assert_eq!(
            check_origin(&guard(), &HeaderMap::new(), None),
            CorsCheck::NotCrossOrigin
        );
    }
}
