//! OpenID Connect discovery document.
//!
//! Served at `/.well-known/openid-configuration`. The document is a pure
//! projection of the issuer and the configured endpoint paths, rebuilt for
//! every request from the request's trusted forwarded host.
//!
//! # Example Response
//!
//! ```json
//! {
//!   "issuer": "https://auth.example.com",
//!   "jwks_uri": "https://auth.example.com/api/oidc/jwks",
//!   "authorization_endpoint": "https://auth.example.com/api/oidc/authorization",
//!   "token_endpoint": "https://auth.example.com/api/oidc/token",
//!   "response_types_supported": ["code"],
//!   "code_challenge_methods_supported": ["plain", "S256"]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::config::OidcConfig;
use crate::keys::SigningKey;

/// Scopes the provider understands.
pub const SUPPORTED_SCOPES: &[&str] = &["openid", "offline_access", "profile", "groups", "email"];

/// Claims the provider may release.
pub const SUPPORTED_CLAIMS: &[&str] = &[
    "aud",
    "exp",
    "iat",
    "iss",
    "jti",
    "rat",
    "sub",
    "auth_time",
    "nonce",
    "email",
    "email_verified",
    "alt_emails",
    "groups",
    "name",
];

const AUTH_METHODS: &[&str] = &[
    "client_secret_post",
    "client_secret_basic",
    "private_key_jwt",
    "none",
];

/// OpenID Provider Metadata (OpenID Connect Discovery 1.0, RFC 8414).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellKnownConfiguration {
    /// Issuer identifier.
    pub issuer: String,
    /// JWKS URL.
    pub jwks_uri: String,

    /// Authorization endpoint URL.
    pub authorization_endpoint: String,
    /// Token endpoint URL.
    pub token_endpoint: String,
    /// Introspection endpoint URL (RFC 7662).
    pub introspection_endpoint: String,
    /// Userinfo endpoint URL.
    pub userinfo_endpoint: String,
    /// Revocation endpoint URL (RFC 7009).
    pub revocation_endpoint: String,

    /// Supported `response_type` values.
    pub response_types_supported: Vec<String>,
    /// Supported `response_mode` values.
    pub response_modes_supported: Vec<String>,
    /// Supported grant types.
    pub grant_types_supported: Vec<String>,
    /// Supported scopes.
    pub scopes_supported: Vec<String>,
    /// Supported claims.
    pub claims_supported: Vec<String>,
    /// Supported `ui_locales`.
    pub ui_locales_supported: Vec<String>,
    /// Supported `display` values.
    pub display_values_supported: Vec<String>,
    /// Supported subject identifier types.
    pub subject_types_supported: Vec<String>,
    /// Supported claim types.
    pub claim_types_supported: Vec<String>,

    /// PKCE methods.
    pub code_challenge_methods_supported: Vec<String>,

    /// Token endpoint client authentication methods.
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// Token endpoint assertion signing algorithms.
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    /// Revocation endpoint client authentication methods.
    pub revocation_endpoint_auth_methods_supported: Vec<String>,
    /// Introspection endpoint client authentication methods.
    pub introspection_endpoint_auth_methods_supported: Vec<String>,

    /// ID token signing algorithms.
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Userinfo signing algorithms.
    pub userinfo_signing_alg_values_supported: Vec<String>,
    /// Request object signing algorithms.
    pub request_object_signing_alg_values_supported: Vec<String>,

    /// Whether the `claims` parameter is supported.
    pub claims_parameter_supported: bool,
    /// Whether the `request` parameter is supported.
    pub request_parameter_supported: bool,
    /// Whether the `request_uri` parameter is supported.
    pub request_uri_parameter_supported: bool,
    /// Whether `request_uri` values must be pre-registered.
    pub require_request_uri_registration: bool,

    /// Back-channel logout.
    pub backchannel_logout_supported: bool,
    /// Back-channel logout with `sid`.
    pub backchannel_logout_session_supported: bool,
    /// Front-channel logout.
    pub frontchannel_logout_supported: bool,
    /// Front-channel logout with `iss` and `sid`.
    pub frontchannel_logout_session_supported: bool,
}

impl WellKnownConfiguration {
    /// Builds the document for `issuer`.
    ///
    /// Endpoint URLs are the issuer followed by the configured path.
    #[must_use]
    pub fn build(issuer: &str, oidc: &OidcConfig) -> Self {
        let base = issuer.trim_end_matches('/');
        let endpoint = |path: &str| format!("{base}{path}");
        let list = |values: &[&str]| values.iter().map(|v| (*v).to_string()).collect::<Vec<_>>();

        Self {
            issuer: base.to_string(),
            jwks_uri: endpoint(&oidc.jwks_path),
            authorization_endpoint: endpoint(&oidc.authorization_path),
            token_endpoint: endpoint(&oidc.token_path),
            introspection_endpoint: endpoint(&oidc.introspection_path),
            userinfo_endpoint: endpoint(&oidc.userinfo_path),
            revocation_endpoint: endpoint(&oidc.revocation_path),

            response_types_supported: list(&["code"]),
            response_modes_supported: list(&["query"]),
            grant_types_supported: list(&[
                "authorization_code",
                "client_credentials",
                "refresh_token",
            ]),
            scopes_supported: list(SUPPORTED_SCOPES),
            claims_supported: list(SUPPORTED_CLAIMS),
            ui_locales_supported: list(&["en-US"]),
            display_values_supported: list(&["page"]),
            subject_types_supported: list(&["public"]),
            claim_types_supported: list(&["normal"]),

            code_challenge_methods_supported: list(&["plain", "S256"]),

            token_endpoint_auth_methods_supported: list(AUTH_METHODS),
            token_endpoint_auth_signing_alg_values_supported: list(&[SigningKey::ALGORITHM_NAME]),
            revocation_endpoint_auth_methods_supported: list(AUTH_METHODS),
            introspection_endpoint_auth_methods_supported: list(AUTH_METHODS),

            id_token_signing_alg_values_supported: list(&[SigningKey::ALGORITHM_NAME]),
            userinfo_signing_alg_values_supported: list(&["none", SigningKey::ALGORITHM_NAME]),
            request_object_signing_alg_values_supported: list(&[
                "none",
                SigningKey::ALGORITHM_NAME,
            ]),

            claims_parameter_supported: true,
            request_parameter_supported: false,
            request_uri_parameter_supported: false,
            require_request_uri_registration: false,

            backchannel_logout_supported: false,
            backchannel_logout_session_supported: false,
            frontchannel_logout_supported: false,
            frontchannel_logout_session_supported: false,
        }
    }
}
