//! Portal login, logout, health and root routes.
//!
//! The login portal UI itself lives elsewhere; these endpoints only open and
//! close sessions against the credential backend.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::GatewayState;
use crate::policy::AuthenticationLevel;

/// First-factor login path.
pub const FIRST_FACTOR_PATH: &str = "/api/firstfactor";
/// Logout path.
pub const LOGOUT_PATH: &str = "/api/logout";

/// Body of `POST /api/firstfactor`.
#[derive(Debug, Clone, Deserialize)]
pub struct FirstFactorRequest {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Where to go after login; dropped unless it is inside the domain.
    #[serde(default, rename = "targetURL", alias = "target_url")]
    pub target_url: Option<String>,
}

/// Portal response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `OK` or `KO`.
    pub status: String,
    /// Follow-up redirect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RedirectData>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Redirect after a portal action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectData {
    /// Validated target.
    pub redirect: String,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            status: "OK".to_string(),
            data: None,
            message: None,
        }
    }

    fn ko(message: &str) -> Self {
        Self {
            status: "KO".to_string(),
            data: None,
            message: Some(message.to_string()),
        }
    }
}

const LOGIN_FAILED: &str = "Authentication failed. Check your credentials.";

/// `POST /api/firstfactor`
///
/// Verifies a password and opens a one-factor session. Unknown users,
/// wrong passwords and disabled accounts all get the same answer.
pub async fn first_factor(
    State(state): State<GatewayState>,
    jar: CookieJar,
    Json(request): Json<FirstFactorRequest>,
) -> Response {
    let level = match state
        .credentials
        .authenticate(&request.username, &request.password)
        .await
    {
        Ok(level) => level,
        Err(e) => return state.error(e),
    };
    if level == AuthenticationLevel::NotAuthenticated {
        warn!(username = %request.username, "First factor failed");
        return (StatusCode::UNAUTHORIZED, Json(StatusResponse::ko(LOGIN_FAILED))).into_response();
    }

    let subject = match state.users.user_details(&request.username).await {
        Ok(Some(subject)) => subject,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, Json(StatusResponse::ko(LOGIN_FAILED)))
                .into_response();
        }
        Err(e) => return state.error(e),
    };

    let session_id = match state.session_store.open(subject, level).await {
        Ok(id) => id,
        Err(e) => return state.error(e),
    };
    info!(username = %request.username, "First factor succeeded");

    let cookie = Cookie::build((state.forward.cookie_name.clone(), session_id))
        .domain(state.forward.guard.domain().to_string())
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    let mut body = StatusResponse::ok();
    body.data = request
        .target_url
        .filter(|target| state.forward.guard.is_safe(target))
        .map(|redirect| RedirectData { redirect });

    (jar.add(cookie), Json(body)).into_response()
}

/// `POST /api/logout`
pub async fn logout(State(state): State<GatewayState>, jar: CookieJar) -> Response {
    let name = state.forward.cookie_name.clone();
    if let Some(cookie) = jar.get(&name) {
        if let Err(e) = state.session_store.close(cookie.value()).await {
            return state.error(e);
        }
    }
    let removal = Cookie::build(name)
        .domain(state.forward.guard.domain().to_string())
        .path("/");
    (jar.remove(removal), Json(StatusResponse::ok())).into_response()
}

/// `GET /api/health`
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// `GET /`
pub async fn index() -> &'static str {
    "gatehouse"
}

/// Sends unknown browser entry points to `/`, keeping the query.
pub async fn redirect_to_root(request: Request) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return StatusCode::NOT_FOUND.into_response();
    }
    let location = match request.uri().query() {
        Some(query) if !query.is_empty() => format!("/?{query}"),
        _ => "/".to_string(),
    };
    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::http::tests::{TestGateway, body_json, cookie_header, proxied};

    fn login(body: serde_json::Value) -> http::Request<Body> {
        proxied(http::Method::POST, FIRST_FACTOR_PATH)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_sets_cookie_and_filters_target() {
        let gateway = TestGateway::new();
        let response = gateway
            .router()
            .oneshot(login(json!({
                "username": "john",
                "password": "password",
                "targetURL": "https://app.example.com/dashboard"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("gatehouse_session="), "{cookie}");
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("Domain=example.com"));

        let body: StatusResponse = body_json(response).await;
        assert_eq!(body.status, "OK");
        assert_eq!(
            body.data.unwrap().redirect,
            "https://app.example.com/dashboard"
        );
    }

    #[tokio::test]
    async fn test_login_drops_foreign_target() {
        let gateway = TestGateway::new();
        let response = gateway
            .router()
            .oneshot(login(json!({
                "username": "john",
                "password": "password",
                "targetURL": "https://evil.com/"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: StatusResponse = body_json(response).await;
        assert!(body.data.is_none());
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let gateway = TestGateway::new();
        let response = gateway
            .router()
            .oneshot(login(json!({ "username": "john", "password": "nope" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let body: StatusResponse = body_json(response).await;
        assert_eq!(body.status, "KO");
    }

    #[tokio::test]
    async fn test_logout_closes_session() {
        let gateway = TestGateway::new();
        let sid = gateway
            .sessions
            .create(crate::session::fixtures::john(), AuthenticationLevel::OneFactor);

        let response = gateway
            .router()
            .oneshot(
                proxied(http::Method::POST, LOGOUT_PATH)
                    .header("cookie", cookie_header(&sid))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!gateway.sessions.destroy(&sid));
    }

    #[tokio::test]
    async fn test_health_and_root_redirect() {
        let gateway = TestGateway::new();
        let response = gateway
            .router()
            .oneshot(proxied(http::Method::GET, "/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: StatusResponse = body_json(response).await;
        assert_eq!(body, StatusResponse::ok());

        let response = gateway
            .router()
            .oneshot(
                proxied(http::Method::GET, "/some/page?rd=https%3A%2F%2Fapp.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/?rd=https%3A%2F%2Fapp.example.com"
        );
    }
}
