//! JWT claim sets issued by the provider.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject: the username, or the client ID for client credentials.
    pub sub: String,
    /// Audience.
    pub aud: Vec<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// JWT ID.
    pub jti: String,
    /// Space-separated scopes.
    pub scope: String,
    /// Client the token was issued to.
    pub client_id: String,
}

impl AccessTokenClaims {
    /// Creates a new builder for access token claims.
    #[must_use]
    pub fn builder(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        client_id: impl Into<String>,
    ) -> AccessTokenClaimsBuilder {
        AccessTokenClaimsBuilder::new(issuer, subject, client_id)
    }

    /// Returns the scopes as a list.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }
}

/// Builder for [`AccessTokenClaims`].
pub struct AccessTokenClaimsBuilder {
    claims: AccessTokenClaims,
}

impl AccessTokenClaimsBuilder {
    fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Self {
            claims: AccessTokenClaims {
                iss: issuer.into(),
                sub: subject.into(),
                aud: Vec::new(),
                exp: now + 3600,
                iat: now,
                jti: Uuid::new_v4().to_string(),
                scope: String::new(),
                client_id: client_id.into(),
            },
        }
    }

    /// Sets the audience.
    #[must_use]
    pub fn audience(mut self, aud: Vec<String>) -> Self {
        self.claims.aud = aud;
        self
    }

    /// Sets the lifetime.
    #[must_use]
    pub fn expires_in(mut self, lifespan: Duration) -> Self {
        self.claims.exp = self.claims.iat + lifespan.whole_seconds();
        self
    }

    /// Sets the scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: &[String]) -> Self {
        self.claims.scope = scopes.join(" ");
        self
    }

    /// Builds the claims.
    #[must_use]
    pub fn build(self) -> AccessTokenClaims {
        self.claims
    }
}

/// ID token claims for OpenID Connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (username).
    pub sub: String,
    /// Audience (client ID).
    pub aud: Vec<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// JWT ID.
    pub jti: String,
    /// Authorized party.
    pub azp: String,
    /// When the user authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    /// Nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Profile claims granted by scope.
    #[serde(flatten)]
    pub profile: ProfileClaims,
}

/// Claims released according to the granted scopes.
///
/// Shared by ID tokens and the userinfo endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileClaims {
    /// Display name (`profile`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Login name (`profile`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// Primary email (`email`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Remaining email addresses (`email`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_emails: Option<Vec<String>>,
    /// Whether the email is verified (`email`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    /// Group memberships (`groups`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl ProfileClaims {
    /// Projects a user onto the claims the scopes allow.
    #[must_use]
    pub fn for_scopes(subject: &crate::session::Subject, scopes: &[String]) -> Self {
        let has = |scope: &str| scopes.iter().any(|s| s == scope);
        let mut claims = Self::default();

        if has("profile") {
            claims.name = Some(subject.display_name.clone());
            claims.preferred_username = Some(subject.username.clone());
        }
        if has("email") {
            if let Some((primary, rest)) = subject.emails.split_first() {
                claims.email = Some(primary.clone());
                claims.email_verified = Some(true);
                if !rest.is_empty() {
                    claims.alt_emails = Some(rest.to_vec());
                }
            }
        }
        if has("groups") {
            claims.groups = Some(subject.groups.clone());
        }
        claims
    }
}

/// Userinfo endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    /// Subject.
    pub sub: String,
    /// Profile claims.
    #[serde(flatten)]
    pub profile: ProfileClaims,
}
