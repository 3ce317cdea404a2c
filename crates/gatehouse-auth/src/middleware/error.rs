//! OAuth 2.0 error responses.
//!
//! `AuthError` renders as the RFC 6749 JSON body
//! `{"error": ..., "error_description": ...}`. 401 responses carry a
//! `WWW-Authenticate` challenge.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::AuthError;

/// OAuth 2.0 error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorBody {
    /// Error code.
    pub error: String,
    /// Human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl AuthError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient { .. }
            | Self::NotFound { .. }
            | Self::InvalidToken { .. }
            | Self::AuthenticationRequired { .. } => StatusCode::UNAUTHORIZED,
            Self::AccessDenied { .. } | Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::UpstreamTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::InvalidRequest { .. }
            | Self::InvalidGrant { .. }
            | Self::UnauthorizedClient { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::InvalidScope { .. }
            | Self::Conflict { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Renders the error.
    ///
    /// Outside production mode the description of a server error carries
    /// the internal detail; in production it is replaced by a generic text.
    #[must_use]
    pub fn to_response(&self, production_mode: bool) -> Response {
        let status = self.status_code();
        let code = self.oauth_error_code();

        if self.is_server_error() {
            error!(error = %self, category = %self.category(), "Request failed");
        }

        let description = if self.is_server_error() && !production_mode {
            self.to_string()
        } else {
            self.public_description()
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

        if status == StatusCode::UNAUTHORIZED {
            let challenge = www_authenticate(self, code, &description);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        let body = OAuthErrorBody {
            error: code.to_string(),
            error_description: Some(description),
        };

        (status, headers, Json(body)).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.to_response(true)
    }
}

/// Builds the challenge: `Basic` for client authentication, `Bearer` otherwise.
fn www_authenticate(error: &AuthError, code: &str, description: &str) -> String {
    let escaped = description.replace('\\', "\\\\").replace('"', "\\\"");
    if error.is_client_authentication_error() {
        "Basic realm=\"gatehouse\"".to_string()
    } else {
        format!("Bearer realm=\"gatehouse\", error=\"{code}\", error_description=\"{escaped}\"")
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn body(response: Response) -> OAuthErrorBody {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_grant_body() {
        let response = AuthError::invalid_grant("code expired").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );

        let body = body(response).await;
        assert_eq!(body.error, "invalid_grant");
        assert_eq!(body.error_description.as_deref(), Some("code expired"));
    }

    #[tokio::test]
    async fn test_replay_surfaces_as_invalid_grant() {
        let response = AuthError::conflict("used twice").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await.error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_unauthorized_has_challenge() {
        let response = AuthError::invalid_token("bad \"token\"").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.starts_with("Bearer realm=\"gatehouse\""));
        assert!(challenge.contains("error=\"invalid_token\""));
        assert!(challenge.contains("bad \\\"token\\\""));

        let response = AuthError::not_found("client 'x'").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"gatehouse\""
        );
        assert_eq!(body(response).await.error, "invalid_client");
    }

    #[tokio::test]
    async fn test_production_hides_server_detail() {
        let err = AuthError::storage("connection refused to 10.0.0.5");

        let body_prod = body(err.to_response(true)).await;
        assert_eq!(body_prod.error, "server_error");
        assert!(!body_prod.error_description.unwrap().contains("10.0.0.5"));

        let body_dev = body(err.to_response(false)).await;
        assert!(body_dev.error_description.unwrap().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_timeout_is_503() {
        let response = AuthError::upstream_timeout("session lookup").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body(response).await.error, "server_error");
    }
}
