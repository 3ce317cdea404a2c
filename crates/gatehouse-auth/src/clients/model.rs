//! Registered OAuth 2.0 / OIDC clients.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::secret::ClientSecret;
use crate::keys::Jwks;
use crate::policy::Level;

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code grant.
    AuthorizationCode,
    /// Client credentials grant (machine-to-machine).
    ClientCredentials,
    /// Refresh token grant.
    RefreshToken,
    /// Implicit grant. Accepted in registrations, never issued by this core.
    Implicit,
}

impl GrantType {
    /// Parses a grant type string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            "implicit" => Some(Self::Implicit),
            _ => None,
        }
    }

    /// Returns the grant type string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::Implicit => "implicit",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token endpoint authentication methods (OpenID Connect Core Section 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// No client authentication (public clients).
    None,
    /// Client secret via HTTP Basic Auth.
    ClientSecretBasic,
    /// Client secret in request body.
    ClientSecretPost,
    /// Client assertion JWT signed with the client's private key.
    PrivateKeyJwt,
}

impl TokenEndpointAuthMethod {
    /// Parses an auth method name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "client_secret_basic" => Some(Self::ClientSecretBasic),
            "client_secret_post" => Some(Self::ClientSecretPost),
            "private_key_jwt" => Some(Self::PrivateKeyJwt),
            _ => None,
        }
    }

    /// Returns the string representation of the auth method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::PrivateKeyJwt => "private_key_jwt",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered relying party.
///
/// Immutable for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client identifier.
    pub id: String,
    /// Human readable description shown on the consent page.
    pub description: String,
    /// Secret for confidential clients.
    pub secret: Option<ClientSecret>,
    /// Public clients cannot keep a secret and must use PKCE.
    pub public: bool,
    /// Exact-match set of redirect URIs.
    pub redirect_uris: Vec<String>,
    /// Allowed grant types.
    pub grant_types: Vec<GrantType>,
    /// Allowed response types (`code`, `code id_token`, ...).
    pub response_types: Vec<String>,
    /// Allowed response modes.
    pub response_modes: Vec<String>,
    /// Allowed scopes.
    pub scopes: Vec<String>,
    /// Allowed audiences.
    pub audience: Vec<String>,
    /// Required token endpoint authentication method. `None` accepts
    /// either client secret method.
    pub auth_method: Option<TokenEndpointAuthMethod>,
    /// Minimum authorization level the end user must have reached.
    pub policy: Level,
    /// Public keys used to verify `private_key_jwt` assertions.
    pub public_keys: Option<Jwks>,
}

impl Client {
    /// Returns `true` if `uri` is byte-for-byte one of the registered URIs.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    /// Returns `true` if the grant type is registered.
    #[must_use]
    pub fn allows_grant_type(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Returns `true` if the response type is registered.
    ///
    /// Multi-valued response types are compared as sets, so `id_token code`
    /// matches a registered `code id_token`.
    #[must_use]
    pub fn allows_response_type(&self, response_type: &str) -> bool {
        let requested = normalize_space_list(response_type);
        !requested.is_empty()
            && self
                .response_types
                .iter()
                .any(|registered| normalize_space_list(registered) == requested)
    }

    /// Returns `true` if the response mode is registered.
    #[must_use]
    pub fn allows_response_mode(&self, mode: &str) -> bool {
        self.response_modes.iter().any(|m| m == mode)
    }

    /// Returns the requested scopes that are not registered for this client.
    #[must_use]
    pub fn unregistered_scopes<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|s| !self.scopes.contains(s))
            .map(String::as_str)
            .collect()
    }

    /// Returns the requested audiences that are not registered for this client.
    #[must_use]
    pub fn unregistered_audience<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        requested
            .iter()
            .filter(|a| !self.audience.contains(a))
            .map(String::as_str)
            .collect()
    }

    /// Returns `true` if the client must authenticate at the token endpoint.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        !self.public
    }
}

fn normalize_space_list(value: &str) -> BTreeSet<&str> {
    value.split_whitespace().collect()
}

/// Splits a space-delimited parameter (scope, audience, response_type).
#[must_use]
pub fn split_space_list(value: Option<&str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    value
        .unwrap_or_default()
        .split_whitespace()
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn confidential_client() -> Client {
        Client {
            id: "app1".to_string(),
            description: "Application One".to_string(),
            secret: Some(ClientSecret::Plaintext("app1-secret".to_string())),
            public: false,
            redirect_uris: vec!["https://app1.example.com/cb".to_string()],
            grant_types: vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::ClientCredentials,
            ],
            response_types: vec!["code".to_string()],
            response_modes: vec!["form_post".to_string(), "query".to_string()],
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "email".to_string(),
                "groups".to_string(),
                "offline_access".to_string(),
            ],
            audience: vec!["https://api.example.com".to_string()],
            auth_method: Some(TokenEndpointAuthMethod::ClientSecretBasic),
            policy: Level::OneFactor,
            public_keys: None,
        }
    }

    pub fn public_client() -> Client {
        Client {
            id: "spa".to_string(),
            description: "Single Page App".to_string(),
            secret: None,
            public: true,
            redirect_uris: vec!["https://spa.example.com/callback".to_string()],
            grant_types: vec![GrantType::AuthorizationCode],
            response_types: vec!["code".to_string()],
            response_modes: vec!["query".to_string()],
            scopes: vec!["openid".to_string(), "profile".to_string()],
            audience: Vec::new(),
            auth_method: Some(TokenEndpointAuthMethod::None),
            policy: Level::TwoFactor,
            public_keys: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_redirect_uri_exact_match_only() {
        let client = confidential_client();

        assert!(client.is_redirect_uri_allowed("https://app1.example.com/cb"));
        assert!(!client.is_redirect_uri_allowed("https://app1.example.com/cb/"));
        assert!(!client.is_redirect_uri_allowed("https://app1.example.com/cb?x=1"));
        assert!(!client.is_redirect_uri_allowed("https://app1.example.com/cb/../legit"));
        assert!(!client.is_redirect_uri_allowed("https://evil.com/cb/../legit"));
        assert!(!client.is_redirect_uri_allowed("https://app1.example.com"));
        assert!(!client.is_redirect_uri_allowed("HTTPS://APP1.EXAMPLE.COM/cb"));
    }

    #[test]
    fn test_response_type_set_comparison() {
        let mut client = confidential_client();
        client.response_types.push("code id_token".to_string());

        assert!(client.allows_response_type("code"));
        assert!(client.allows_response_type("id_token code"));
        assert!(!client.allows_response_type("token"));
        assert!(!client.allows_response_type(""));
    }

    #[test]
    fn test_unregistered_scopes() {
        let client = public_client();
        let requested = vec!["openid".to_string(), "email".to_string()];
        assert_eq!(client.unregistered_scopes(&requested), vec!["email"]);
    }

    #[test]
    fn test_split_space_list_dedupes() {
        assert_eq!(
            split_space_list(Some("openid  profile openid")),
            vec!["openid".to_string(), "profile".to_string()]
        );
        assert!(split_space_list(None).is_empty());
    }

    #[test]
    fn test_grant_type_parse() {
        assert_eq!(
            GrantType::parse("client_credentials"),
            Some(GrantType::ClientCredentials)
        );
        assert_eq!(GrantType::parse("password"), None);
        assert_eq!(GrantType::RefreshToken.to_string(), "refresh_token");
    }
}
