//! Token and grant persistence.
//!
//! Every issued artifact (authorization code, access token, refresh token)
//! is recorded as a [`GrantRecord`] keyed by the SHA-256 fingerprint of the
//! token value, so raw tokens are never kept at rest.
//!
//! Implementations:
//! - [`MemoryGrantStore`] - in-process store, per-record atomic updates
//! - [`LayeredGrantStore`] - primary store with an in-memory fallback
//! - [`TimeoutGrantStore`] - bounds every call with a deadline

pub mod layered;
pub mod memory;
pub mod timeout;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use crate::oauth::pkce::PkceChallenge;

pub use layered::LayeredGrantStore;
pub use memory::MemoryGrantStore;
pub use timeout::TimeoutGrantStore;

/// Errors returned by grant stores.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the token.
    #[error("Grant not found")]
    NotFound,

    /// The record exists but its lifetime has elapsed.
    #[error("Grant expired")]
    Expired,

    /// A single-use record was already redeemed.
    #[error("Grant already used")]
    AlreadyUsed,

    /// The record was explicitly revoked.
    #[error("Grant revoked")]
    Revoked,

    /// The backing store did not answer in time.
    #[error("Store operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// The backing store failed.
    #[error("Store backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns `true` if the store itself is unavailable, as opposed to the
    /// record being in a terminal state.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend { .. })
    }
}

/// Kind of artifact a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Single-use authorization code.
    AuthorizationCode,
    /// Signed access token.
    AccessToken,
    /// Opaque refresh token.
    RefreshToken,
}

impl TokenKind {
    /// Returns the RFC 7662 `token_type_hint` style name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// A persisted grant artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    /// Kind of artifact.
    pub kind: TokenKind,
    /// Identifier shared by every artifact derived from one authorization.
    pub grant_id: String,
    /// Client the artifact was issued to.
    pub client_id: String,
    /// End-user subject; `None` for client credentials grants.
    pub subject: Option<String>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Granted audience.
    pub audience: Vec<String>,
    /// Redirect URI presented at the authorization endpoint.
    pub redirect_uri: Option<String>,
    /// PKCE challenge bound to an authorization code.
    pub pkce: Option<PkceChallenge>,
    /// OIDC nonce from the authorization request.
    pub nonce: Option<String>,
    /// When the subject authenticated.
    #[serde(with = "time::serde::rfc3339::option")]
    pub auth_time: Option<OffsetDateTime>,
    /// Issue time.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    /// Expiry time.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Set by revocation.
    pub revoked: bool,
    /// Set when a single-use artifact is redeemed.
    #[serde(with = "time::serde::rfc3339::option")]
    pub used_at: Option<OffsetDateTime>,
}

impl GrantRecord {
    /// Creates a record that expires `lifespan` from now.
    #[must_use]
    pub fn new(
        kind: TokenKind,
        grant_id: impl Into<String>,
        client_id: impl Into<String>,
        lifespan: Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            kind,
            grant_id: grant_id.into(),
            client_id: client_id.into(),
            subject: None,
            scopes: Vec::new(),
            audience: Vec::new(),
            redirect_uri: None,
            pkce: None,
            nonce: None,
            auth_time: None,
            issued_at: now,
            expires_at: now + lifespan,
            revoked: false,
            used_at: None,
        }
    }

    /// Derives a record of another kind from the same grant.
    #[must_use]
    pub fn derive(&self, kind: TokenKind, lifespan: Duration) -> Self {
        let mut record = Self::new(kind, &self.grant_id, &self.client_id, lifespan);
        record.subject = self.subject.clone();
        record.scopes = self.scopes.clone();
        record.audience = self.audience.clone();
        record.nonce = self.nonce.clone();
        record.auth_time = self.auth_time;
        record
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the audience.
    #[must_use]
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Binds a PKCE challenge.
    #[must_use]
    pub fn with_pkce(mut self, pkce: Option<PkceChallenge>) -> Self {
        self.pkce = pkce;
        self
    }

    /// Sets the OIDC nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    /// Sets the authentication time.
    #[must_use]
    pub fn with_auth_time(mut self, auth_time: Option<OffsetDateTime>) -> Self {
        self.auth_time = auth_time;
        self
    }

    /// Returns `true` if the record's lifetime has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Returns `true` if the record can still be used or introspected as active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.revoked && self.used_at.is_none() && !self.is_expired()
    }

    /// Returns `true` if the record contains the scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Result of a store-level introspection.
#[derive(Debug, Clone)]
pub struct Introspection {
    /// Whether the token is currently usable.
    pub active: bool,
    /// The record, when active.
    pub record: Option<GrantRecord>,
}

impl Introspection {
    /// An inactive result.
    #[must_use]
    pub fn inactive() -> Self {
        Self {
            active: false,
            record: None,
        }
    }
}

/// Storage for issued grants.
///
/// Code exchange and refresh-token consumption must be atomic per record:
/// when two callers race on the same value exactly one succeeds and the
/// other observes [`StoreError::AlreadyUsed`].
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Persists an authorization code record and returns the code value.
    async fn issue_authorization_code(&self, record: GrantRecord) -> Result<String, StoreError>;

    /// Redeems an authorization code exactly once.
    async fn exchange_code(&self, code: &str) -> Result<GrantRecord, StoreError>;

    /// Records an access token minted by the caller.
    async fn issue_access_token(&self, token: &str, record: GrantRecord)
    -> Result<(), StoreError>;

    /// Persists a refresh token record and returns the token value.
    async fn issue_refresh_token(&self, record: GrantRecord) -> Result<String, StoreError>;

    /// Redeems a refresh token exactly once (rotation).
    async fn consume_refresh_token(&self, token: &str) -> Result<GrantRecord, StoreError>;

    /// Looks up the record for a token regardless of its state.
    async fn find(&self, token: &str) -> Result<GrantRecord, StoreError>;

    /// Marks a token revoked and returns its record.
    async fn revoke(&self, token: &str) -> Result<GrantRecord, StoreError>;

    /// Revokes every artifact of a grant. Returns how many were revoked.
    async fn revoke_grant(&self, grant_id: &str) -> Result<usize, StoreError>;

    /// Drops records whose lifetime has elapsed. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// Reports whether a token is active.
    async fn introspect(&self, token: &str) -> Result<Introspection, StoreError> {
        match self.find(token).await {
            Ok(record) if record.is_active() && record.kind != TokenKind::AuthorizationCode => {
                Ok(Introspection {
                    active: true,
                    record: Some(record),
                })
            }
            Ok(_) | Err(StoreError::NotFound) => Ok(Introspection::inactive()),
            Err(e) => Err(e),
        }
    }
}

/// Generates an opaque token value (256 bits, base64url).
#[must_use]
pub fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Returns the storage key for a token value.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_random() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn test_fingerprint_is_stable_and_opaque() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert!(!fingerprint("secret-token").contains("secret"));
    }

    #[test]
    fn test_record_activity() {
        let record = GrantRecord::new(TokenKind::AccessToken, "g", "c", Duration::minutes(5));
        assert!(record.is_active());

        let expired = GrantRecord::new(TokenKind::AccessToken, "g", "c", Duration::seconds(-1));
        assert!(expired.is_expired());
        assert!(!expired.is_active());

        let mut revoked = record.clone();
        revoked.revoked = true;
        assert!(!revoked.is_active());
    }

    #[test]
    fn test_derive_keeps_grant_identity() {
        let code = GrantRecord::new(TokenKind::AuthorizationCode, "g1", "app", Duration::minutes(1))
            .with_subject("john")
            .with_scopes(vec!["openid".to_string()])
            .with_redirect_uri("https://app/cb");

        let access = code.derive(TokenKind::AccessToken, Duration::hours(1));
        assert_eq!(access.grant_id, "g1");
        assert_eq!(access.subject.as_deref(), Some("john"));
        assert_eq!(access.scopes, vec!["openid".to_string()]);
        assert!(access.redirect_uri.is_none());
        assert!(access.pkce.is_none());
    }

    #[test]
    fn test_unavailable_predicate() {
        assert!(StoreError::timeout("find").is_unavailable());
        assert!(StoreError::backend("down").is_unavailable());
        assert!(!StoreError::AlreadyUsed.is_unavailable());
    }
}
