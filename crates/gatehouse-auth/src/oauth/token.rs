//! Token endpoint request and response types.
//!
//! Different fields are required depending on the `grant_type`:
//!
//! - `authorization_code`: code, redirect_uri, code_verifier (when PKCE was used)
//! - `refresh_token`: refresh_token, (optional) scope
//! - `client_credentials`: (optional) scope, audience

use serde::{Deserialize, Serialize};

use crate::oauth::ClientCredentials;

/// Token request parameters.
///
/// Clients authenticate with the HTTP Basic header (not in this struct) or
/// with the credential fields below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    pub grant_type: String,

    /// Authorization code.
    pub code: Option<String>,

    /// Redirect URI; must match the authorization request.
    pub redirect_uri: Option<String>,

    /// PKCE code verifier.
    pub code_verifier: Option<String>,

    /// Refresh token.
    pub refresh_token: Option<String>,

    /// Requested scope. Narrows a refresh; selects scopes for client credentials.
    pub scope: Option<String>,

    /// Requested audience for client credentials.
    pub audience: Option<String>,

    /// Client ID (public clients or `client_secret_post`).
    pub client_id: Option<String>,

    /// Client secret (`client_secret_post`).
    pub client_secret: Option<String>,

    /// Client assertion type (`private_key_jwt`).
    pub client_assertion_type: Option<String>,

    /// Client assertion JWT (`private_key_jwt`).
    pub client_assertion: Option<String>,
}

impl TokenRequest {
    /// Client credentials carried in the body.
    #[must_use]
    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            client_assertion_type: self.client_assertion_type.clone(),
            client_assertion: self.client_assertion.clone(),
        }
    }
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid profile offline_access",
///   "refresh_token": "0kL2...",
///   "id_token": "eyJhbG..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token (JWT).
    pub access_token: String,

    /// Token type, always `Bearer`.
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes.
    pub scope: String,

    /// Refresh token (when `offline_access` was granted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (when `openid` was granted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Creates a new token response with required fields.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            id_token: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token;
        self
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: Option<String>) -> Self {
        self.id_token = token;
        self
    }
}
