//! Authorization endpoint types.
//!
//! Parameters are parsed leniently (every field optional) so that a missing
//! parameter becomes a proper OAuth 2.0 error instead of a query rejection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Authorization request parameters.
///
/// ```text
/// GET /api/oidc/authorization?
///   response_type=code
///   &client_id=app1
///   &redirect_uri=https://app1.example.com/cb
///   &scope=openid profile
///   &state=af0ifjsldkj
///   &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM
///   &code_challenge_method=S256
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationRequest {
    /// Requested response type; only `code` is issued.
    pub response_type: Option<String>,
    /// Client identifier.
    pub client_id: Option<String>,
    /// Redirect URI; must exactly match a registered URI.
    pub redirect_uri: Option<String>,
    /// Space-delimited scopes.
    pub scope: Option<String>,
    /// Opaque client state echoed back.
    pub state: Option<String>,
    /// PKCE challenge.
    pub code_challenge: Option<String>,
    /// PKCE method, `plain` when absent.
    pub code_challenge_method: Option<String>,
    /// OIDC nonce.
    pub nonce: Option<String>,
    /// Space-delimited requested audience.
    pub audience: Option<String>,
    /// Response mode; only `query` is produced.
    pub response_mode: Option<String>,
}

/// Successful authorization response.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResponse {
    /// Single-use authorization code.
    pub code: String,
    /// Echoed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Issuer identifier (RFC 9207).
    pub iss: String,
}

impl AuthorizationResponse {
    /// Builds the client redirect carrying the code.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI does not parse.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(ref state) = self.state {
                pairs.append_pair("state", state);
            }
            pairs.append_pair("iss", &self.iss);
        }
        Ok(url.to_string())
    }
}

/// Authorization error delivered to the client's redirect URI.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationError {
    /// OAuth 2.0 error code.
    pub error: AuthorizationErrorCode,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Echoed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationError {
    /// Creates an error with a description.
    #[must_use]
    pub fn with_description(
        error: AuthorizationErrorCode,
        description: impl Into<String>,
        state: Option<String>,
    ) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
            state,
        }
    }

    /// Converts an [`AuthError`] using its public description.
    #[must_use]
    pub fn from_auth_error(err: &AuthError, state: Option<String>) -> Self {
        Self::with_description(
            AuthorizationErrorCode::from_auth_error(err),
            err.public_description(),
            state,
        )
    }

    /// Builds the client redirect carrying the error.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI does not parse.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("error", self.error.as_str());
            if let Some(ref desc) = self.error_description {
                pairs.append_pair("error_description", desc);
            }
            if let Some(ref state) = self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Authorization endpoint error codes (RFC 6749 Section 4.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorCode {
    /// Malformed request.
    InvalidRequest,
    /// Client may not use this flow.
    UnauthorizedClient,
    /// Resource owner or policy denied the request.
    AccessDenied,
    /// Response type not supported.
    UnsupportedResponseType,
    /// Scope invalid or not registered.
    InvalidScope,
    /// Unexpected server condition.
    ServerError,
    /// The server is temporarily unable to handle the request.
    TemporarilyUnavailable,
}

impl AuthorizationErrorCode {
    /// Returns the wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
            Self::TemporarilyUnavailable => "temporarily_unavailable",
        }
    }

    /// Maps an [`AuthError`] onto the codes allowed at this endpoint.
    #[must_use]
    pub fn from_auth_error(err: &AuthError) -> Self {
        match err {
            AuthError::UnauthorizedClient { .. } => Self::UnauthorizedClient,
            AuthError::AccessDenied { .. } | AuthError::Forbidden { .. } => Self::AccessDenied,
            AuthError::UnsupportedResponseType { .. } => Self::UnsupportedResponseType,
            AuthError::InvalidScope { .. } => Self::InvalidScope,
            AuthError::UpstreamTimeout { .. } => Self::TemporarilyUnavailable,
            e if e.is_server_error() => Self::ServerError,
            _ => Self::InvalidRequest,
        }
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
