//! Forward-auth decision endpoint.
//!
//! The reverse proxy sends a sub-request describing the original request.
//! The answer is `200` (allow, with identity headers for the upstream
//! application), a redirect to the login portal, `401` for XHR callers, or
//! `403` when an identified subject is denied.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use tracing::{debug, info, warn};
use url::Url;

use super::cors::{CorsCheck, check_origin};
use super::forwarded::{ForwardedRequest, PeerAddr, TrustedProxies};
use super::redirect::RedirectGuard;
use crate::error::AuthError;
use crate::policy::{AccessTarget, AuthenticationLevel, Level, PolicyEngine};
use crate::session::{RequestContext, Session, SessionProvider, load_session};

/// Authenticated username.
pub const REMOTE_USER: HeaderName = HeaderName::from_static("remote-user");
/// Comma separated groups.
pub const REMOTE_GROUPS: HeaderName = HeaderName::from_static("remote-groups");
/// Display name.
pub const REMOTE_NAME: HeaderName = HeaderName::from_static("remote-name");
/// Primary email.
pub const REMOTE_EMAIL: HeaderName = HeaderName::from_static("remote-email");

/// Everything the decision needs.
#[derive(Clone)]
pub struct ForwardAuthState {
    /// Access rules.
    pub policy: Arc<PolicyEngine>,
    /// Session collaborator.
    pub sessions: Arc<dyn SessionProvider>,
    /// Open-redirect and origin check.
    pub guard: RedirectGuard,
    /// Proxies whose forwarded headers are believed.
    pub trusted: TrustedProxies,
    /// Login portal.
    pub portal_url: Url,
    /// Session cookie name.
    pub cookie_name: String,
    /// Deadline for one session lookup.
    pub store_timeout: Duration,
    /// Pause before the single lookup retry.
    pub retry_backoff: Duration,
    /// Hide internal error detail.
    pub production_mode: bool,
}

/// The decision for one forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through.
    Allow,
    /// Send the user to the portal.
    Login,
    /// The identified subject may not access the resource.
    Forbidden,
}

/// Decides a request from its required and achieved levels.
#[must_use]
pub fn decide(required: Level, session: Option<&Session>) -> Decision {
    let achieved = session.map_or(AuthenticationLevel::NotAuthenticated, |s| s.level);

    match required {
        Level::Deny if session.is_some() => Decision::Forbidden,
        Level::Deny => Decision::Login,
        level if level.is_satisfied_by(achieved) => Decision::Allow,
        _ => Decision::Login,
    }
}

/// Forward-auth handler.
pub async fn forward_auth(
    State(state): State<ForwardAuthState>,
    PeerAddr(peer): PeerAddr,
    headers: HeaderMap,
) -> Response {
    let target = match ForwardedRequest::from_headers(&headers, peer, &state.trusted) {
        Ok(target) => target,
        Err(e) => {
            warn!(error = %e, peer = ?peer, "Rejecting forward-auth request");
            return AuthError::invalid_request(e.to_string()).to_response(state.production_mode);
        }
    };

    let cors = match check_origin(&state.guard, &headers, Some(&target.origin())) {
        CorsCheck::NotCrossOrigin => None,
        CorsCheck::Allowed(cors) => Some(cors),
        CorsCheck::Rejected => {
            return AuthError::invalid_request("Origin is not allowed")
                .to_response(state.production_mode);
        }
    };

    let preflight = target.method.as_deref() == Some("OPTIONS")
        && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    if preflight && cors.is_some() {
        return with_cors(StatusCode::OK.into_response(), cors);
    }

    let response = authorize(&state, &target, &headers).await;
    with_cors(response, cors)
}

async fn authorize(state: &ForwardAuthState, target: &ForwardedRequest, headers: &HeaderMap) -> Response {
    let ctx = RequestContext {
        session_id: CookieJar::from_headers(headers)
            .get(&state.cookie_name)
            .map(|c| c.value().to_string()),
        remote_ip: target.remote_ip,
    };

    let session = match load_session(
        state.sessions.as_ref(),
        &ctx,
        state.store_timeout,
        state.retry_backoff,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "Session lookup failed");
            return e.to_response(state.production_mode);
        }
    };

    let access = AccessTarget {
        domain: target.host(),
        path: target.path(),
        method: target.method.as_deref(),
        remote_ip: target.remote_ip,
    };
    let evaluation = state
        .policy
        .evaluate_target(session.as_ref().map(|s| &s.subject), &access);

    let decision = decide(evaluation.level, session.as_ref());
    debug!(
        url = %target.url,
        required = %evaluation.level,
        rule = ?evaluation.rule,
        user = session.as_ref().map(|s| s.subject.username.as_str()),
        decision = ?decision,
        "Forward-auth decision"
    );

    match decision {
        Decision::Allow => allow(session.as_ref()),
        Decision::Forbidden => {
            info!(
                url = %target.url,
                user = session.as_ref().map(|s| s.subject.username.as_str()),
                "Access forbidden"
            );
            StatusCode::FORBIDDEN.into_response()
        }
        Decision::Login => login(state, target, headers),
    }
}

fn allow(session: Option<&Session>) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(session) = session {
        let subject = &session.subject;
        let values = [
            (REMOTE_USER, subject.username.clone()),
            (REMOTE_GROUPS, subject.groups.join(",")),
            (REMOTE_NAME, subject.display_name.clone()),
            (REMOTE_EMAIL, subject.emails.first().cloned().unwrap_or_default()),
        ];
        for (name, value) in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }
    (StatusCode::OK, headers).into_response()
}

/// Redirects to the portal with `rd=<original URL>`, or answers `401` to
/// callers that cannot follow a redirect.
fn login(state: &ForwardAuthState, target: &ForwardedRequest, headers: &HeaderMap) -> Response {
    let unauthorized = || {
        AuthError::authentication_required("Authentication required").to_response(state.production_mode)
    };

    if is_xhr(headers) {
        return unauthorized();
    }
    if !state.guard.is_safe_url(&target.url) {
        debug!(url = %target.url, "Target outside the protected domain, not redirecting");
        return unauthorized();
    }

    let mut location = state.portal_url.clone();
    location
        .query_pairs_mut()
        .append_pair("rd", target.url.as_str());

    let status = match target.method.as_deref() {
        None | Some("GET" | "HEAD") => StatusCode::FOUND,
        Some(_) => StatusCode::SEE_OTHER,
    };

    match HeaderValue::from_str(location.as_str()) {
        Ok(value) => (status, [(header::LOCATION, value)]).into_response(),
        Err(_) => unauthorized(),
    }
}

/// XHR callers and callers that do not accept HTML get a status code.
fn is_xhr(headers: &HeaderMap) -> bool {
    let requested_with = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));

    let accepts_html = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_none_or(|accept| accept.contains("text/html") || accept.contains("*/*"));

    requested_with || !accepts_html
}

fn with_cors(mut response: Response, cors: Option<HeaderMap>) -> Response {
    if let Some(cors) = cors {
        response.headers_mut().extend(cors);
    }
    response
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Router, body::Body, extract::ConnectInfo, http, routing::get};
    use tower::ServiceExt;

    use super::*;
    use crate::policy::{AccessRuleConfig, RuleSet};
    use crate::session::MemorySessionProvider;
    use crate::session::fixtures::john;

    struct Harness {
        sessions: Arc<MemorySessionProvider>,
        app: Router,
    }

    fn rule(resources: &[&str], policy: &str) -> AccessRuleConfig {
        AccessRuleConfig {
            domain: vec!["*.example.com".to_string()],
            resources: resources.iter().map(|r| (*r).to_string()).collect(),
            policy: policy.to_string(),
            ..AccessRuleConfig::default()
        }
    }

    fn harness() -> Harness {
        let rules = RuleSet::compile(
            "deny",
            &[
                rule(&["/static/*"], "bypass"),
                rule(&["/secret/*"], "deny"),
                rule(&["/admin/*"], "two_factor"),
                rule(&["/*"], "one_factor"),
            ],
        )
        .unwrap();
        let sessions = Arc::new(MemorySessionProvider::new(time::Duration::hours(1)));

        let state = ForwardAuthState {
            policy: Arc::new(PolicyEngine::new(rules)),
            sessions: sessions.clone(),
            guard: RedirectGuard::new("example.com"),
            trusted: TrustedProxies::new(vec!["127.0.0.0/8".parse().unwrap()]),
            portal_url: Url::parse("https://auth.example.com").unwrap(),
            cookie_name: "gatehouse_session".to_string(),
            store_timeout: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(1),
            production_mode: true,
        };

        Harness {
            sessions,
            app: Router::new()
                .route("/api/verify", get(forward_auth))
                .with_state(state),
        }
    }

    fn request(path: &str, extra: &[(&str, String)]) -> http::Request<Body> {
        let mut builder = http::Request::builder()
            .uri("/api/verify")
            .header("x-forwarded-proto", "https")
            .header("x-forwarded-host", "app.example.com")
            .header("x-forwarded-uri", path)
            .header("x-forwarded-method", "GET");
        for (name, value) in extra {
            builder = builder.header(*name, value.as_str());
        }
        let mut req = builder.body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        req
    }

    fn cookie(id: &str) -> (&'static str, String) {
        ("cookie", format!("gatehouse_session={id}"))
    }

    #[test]
    fn test_decide() {
        assert_eq!(decide(Level::Bypass, None), Decision::Allow);
        assert_eq!(decide(Level::OneFactor, None), Decision::Login);
        assert_eq!(decide(Level::Deny, None), Decision::Login);
    }

    #[tokio::test]
    async fn test_anonymous_redirected_with_encoded_rd() {
        let h = harness();
        let response = h.app.oneshot(request("/admin/x?tab=1", &[])).await.unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://auth.example.com/?rd=https%3A%2F%2Fapp.example.com%2Fadmin%2Fx%3Ftab%3D1"
        );
    }

    #[tokio::test]
    async fn test_xhr_gets_401() {
        let h = harness();
        let response = h
            .app
            .oneshot(request("/admin/x", &[("x-requested-with", "XMLHttpRequest".to_string())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let h = harness();
        let response = h
            .app
            .oneshot(request("/admin/x", &[("accept", "application/json".to_string())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_first_match_wins_for_sessions() {
        let h = harness();
        let id = h.sessions.create(john(), AuthenticationLevel::OneFactor);

        let response = h
            .app
            .clone()
            .oneshot(request("/dashboard", &[cookie(&id)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REMOTE_USER], "john");
        assert_eq!(response.headers()[REMOTE_GROUPS], "admins,dev");
        assert_eq!(response.headers()[REMOTE_EMAIL], "john@example.com");

        let response = h
            .app
            .oneshot(request("/admin/x", &[cookie(&id)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_two_factor_session_allowed() {
        let h = harness();
        let id = h.sessions.create(john(), AuthenticationLevel::TwoFactor);
        let response = h
            .app
            .oneshot(request("/admin/x", &[cookie(&id)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bypass_and_deny() {
        let h = harness();
        let response = h.app.clone().oneshot(request("/static/app.js", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(REMOTE_USER).is_none());

        let id = h.sessions.create(john(), AuthenticationLevel::TwoFactor);
        let response = h
            .app
            .oneshot(request("/secret/x", &[cookie(&id)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bad_forwarded_headers() {
        let h = harness();
        let mut req = http::Request::builder()
            .uri("/api/verify")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        let response = h.app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let mut req = request("/dashboard", &[]);
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 1], 40000))));
        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cross_origin() {
        let h = harness();
        let id = h.sessions.create(john(), AuthenticationLevel::OneFactor);

        let response = h
            .app
            .clone()
            .oneshot(request(
                "/dashboard",
                &[cookie(&id), ("origin", "https://other.example.com".to_string())],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://other.example.com"
        );

        let response = h
            .app
            .clone()
            .oneshot(request(
                "/dashboard",
                &[cookie(&id), ("origin", "https://example.com.evil.com".to_string())],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let response = h
            .app
            .oneshot(request(
                "/dashboard",
                &[cookie(&id), ("origin", "https://app.example.com".to_string())],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_preflight_answered_without_session() {
        let h = harness();
        let mut req = request(
            "/dashboard",
            &[
                ("origin", "https://other.example.com".to_string()),
                ("access-control-request-method", "PUT".to_string()),
            ],
        );
        req.headers_mut()
            .insert("x-forwarded-method", HeaderValue::from_static("OPTIONS"));

        let response = h.app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "PUT");
    }
}
