//! Token revocation (RFC 7009).
//!
//! The endpoint answers 200 whether or not the token existed, so callers
//! cannot probe for valid tokens. Revoking a refresh token revokes every
//! artifact of the same grant.

use serde::{Deserialize, Serialize};

use crate::oauth::ClientCredentials;
use crate::store::TokenKind;

/// Token revocation request.
#[derive(Debug, Clone, Deserialize)]
pub struct RevocationRequest {
    /// The token to revoke.
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

impl RevocationRequest {
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

/// Token type hint for revocation and introspection requests.
///
/// The hint is advisory; the store identifies the token regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    /// The token is an access token.
    AccessToken,
    /// The token is a refresh token.
    RefreshToken,
}

impl TokenTypeHint {
    /// Returns the token type hint as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }

    /// Returns `true` if the hint names `kind`.
    #[must_use]
    pub fn matches(&self, kind: TokenKind) -> bool {
        matches!(
            (self, kind),
            (Self::AccessToken, TokenKind::AccessToken)
                | (Self::RefreshToken, TokenKind::RefreshToken)
        )
    }
}

impl std::fmt::Display for TokenTypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_deserialization() {
        let hint: TokenTypeHint = serde_json::from_str(r#""refresh_token""#).unwrap();
        assert_eq!(hint, TokenTypeHint::RefreshToken);
        assert!(serde_json::from_str::<TokenTypeHint>(r#""id_token""#).is_err());
    }

    #[test]
    fn test_hint_matches_kind() {
        assert!(TokenTypeHint::AccessToken.matches(TokenKind::AccessToken));
        assert!(!TokenTypeHint::AccessToken.matches(TokenKind::RefreshToken));
        assert!(!TokenTypeHint::RefreshToken.matches(TokenKind::AuthorizationCode));
    }

    #[test]
    fn test_request_credentials() {
        let request: RevocationRequest = serde_json::from_str(
            r#"{"token":"t","client_id":"app1","client_secret":"s"}"#,
        )
        .unwrap();
        let creds = request.credentials();
        assert_eq!(creds.client_id.as_deref(), Some("app1"));
        assert_eq!(creds.client_secret.as_deref(), Some("s"));
        assert!(request.token_type_hint.is_none());
    }
}
