//! Token introspection (RFC 7662).
//!
//! Only `active` is required in a response. A caller that is not entitled
//! to see a token gets exactly the same answer as for an unknown token.

use serde::{Deserialize, Serialize};

use super::revocation::TokenTypeHint;
use crate::oauth::ClientCredentials;
use crate::store::{GrantRecord, TokenKind};

/// Token introspection request.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionRequest {
    /// The token to introspect.
    pub token: String,

    /// Optional hint about the token type.
    #[serde(default)]
    pub token_type_hint: Option<TokenTypeHint>,

    /// Client ID (`client_secret_post`).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (`client_secret_post`).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Client assertion type (`private_key_jwt`).
    #[serde(default)]
    pub client_assertion_type: Option<String>,

    /// Client assertion (`private_key_jwt`).
    #[serde(default)]
    pub client_assertion: Option<String>,
}

impl IntrospectionRequest {
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

/// Token introspection response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntrospectionResponse {
    /// Whether the token is currently active.
    pub active: bool,

    /// Space-separated granted scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Client the token was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Resource owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// `Bearer` for access tokens, `refresh_token` for refresh tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiration time (Unix timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued at time (Unix timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Subject (username or client ID).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,

    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    /// The response for any token the caller may not learn about.
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Describes an active record.
    #[must_use]
    pub fn active(record: &GrantRecord, issuer: &str) -> Self {
        let token_type = match record.kind {
            TokenKind::RefreshToken => "refresh_token",
            _ => "Bearer",
        };
        let sub = record
            .subject
            .clone()
            .unwrap_or_else(|| record.client_id.clone());

        Self {
            active: true,
            scope: Some(record.scopes.join(" ")),
            client_id: Some(record.client_id.clone()),
            username: record.subject.clone(),
            token_type: Some(token_type.to_string()),
            exp: Some(record.expires_at.unix_timestamp()),
            iat: Some(record.issued_at.unix_timestamp()),
            sub: Some(sub),
            aud: (!record.audience.is_empty()).then(|| record.audience.clone()),
            iss: Some(issuer.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[test]
    fn test_inactive_serializes_only_active() {
        let json = serde_json::to_string(&IntrospectionResponse::inactive()).unwrap();
        assert_eq!(json, r#"{"active":false}"#);
    }

    #[test]
    fn test_active_client_credentials_record() {
        let record = GrantRecord::new(TokenKind::AccessToken, "g", "svc", Duration::hours(1))
            .with_scopes(vec!["read".to_string(), "write".to_string()]);

        let response = IntrospectionResponse::active(&record, "https://auth.example.com");
        assert!(response.active);
        assert_eq!(response.sub.as_deref(), Some("svc"));
        assert!(response.username.is_none());
        assert_eq!(response.scope.as_deref(), Some("read write"));
        assert_eq!(response.token_type.as_deref(), Some("Bearer"));
        assert!(response.aud.is_none());
    }
}
