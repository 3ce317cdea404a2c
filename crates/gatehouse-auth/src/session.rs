//! Session and credential collaborators.
//!
//! The gateway consumes sessions and user credentials through narrow traits.
//! Backends (key-value stores, LDAP, SQL) are selected at startup; the
//! in-memory implementations here serve single-node deployments and tests.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::AuthResult;
use crate::clients::ClientSecret;
use crate::error::AuthError;
use crate::policy::AuthenticationLevel;
use crate::store::generate_token;

// =============================================================================
// Identity
// =============================================================================

/// An end user as known to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Login name; used as the `sub` claim.
    pub username: String,
    /// Display name.
    pub display_name: String,
    /// Email addresses, primary first.
    pub emails: Vec<String>,
    /// Group memberships.
    pub groups: Vec<String>,
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque session identifier (the cookie value).
    pub id: String,
    /// Authenticated user.
    pub subject: Subject,
    /// Factors completed.
    pub level: AuthenticationLevel,
    /// When the first factor completed.
    pub auth_time: OffsetDateTime,
    /// Absolute expiry.
    pub expires_at: OffsetDateTime,
}

impl Session {
    /// Returns `true` if the session is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }
}

/// What the session collaborator needs to find a session.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Session cookie value, if any.
    pub session_id: Option<String>,
    /// Original client address.
    pub remote_ip: Option<IpAddr>,
}

impl RequestContext {
    /// Context for a session cookie.
    #[must_use]
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            remote_ip: None,
        }
    }
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Resolves the session attached to a request.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Returns the session, or `None` when the request carries no valid one.
    async fn get_session(&self, ctx: &RequestContext) -> AuthResult<Option<Session>>;
}

/// Opens and closes sessions for the login portal.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Opens a session and returns its identifier.
    async fn open(&self, subject: Subject, level: AuthenticationLevel) -> AuthResult<String>;

    /// Ends a session. Returns `true` if it existed.
    async fn close(&self, session_id: &str) -> AuthResult<bool>;
}

/// Verifies user credentials.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    /// Checks a credential and returns the level it establishes.
    ///
    /// Unknown users and wrong credentials both yield
    /// [`AuthenticationLevel::NotAuthenticated`].
    async fn authenticate(&self, username: &str, credential: &str)
    -> AuthResult<AuthenticationLevel>;
}

/// Looks up user profile details.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user's details, or `None` if unknown.
    async fn user_details(&self, username: &str) -> AuthResult<Option<Subject>>;
}

/// Loads a session within `timeout`, retrying once after `backoff`.
///
/// Session lookups are idempotent, so a slow or failing backend gets a
/// second attempt before the request is failed with a 503.
///
/// # Errors
///
/// Returns `UpstreamTimeout` if both attempts exceed the deadline, or the
/// backend's error if it fails twice.
pub async fn load_session(
    provider: &dyn SessionProvider,
    ctx: &RequestContext,
    timeout: StdDuration,
    backoff: StdDuration,
) -> AuthResult<Option<Session>> {
    let attempt = || async {
        tokio::time::timeout(timeout, provider.get_session(ctx))
            .await
            .map_err(|_| AuthError::upstream_timeout("session lookup"))?
    };

    match attempt().await {
        Err(e) if e.is_server_error() => {
            debug!(error = %e, "Retrying session lookup");
            tokio::time::sleep(backoff).await;
            attempt().await
        }
        other => other,
    }
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// Session store held in process memory.
#[derive(Debug)]
pub struct MemorySessionProvider {
    sessions: DashMap<String, Session>,
    lifespan: Duration,
}

impl MemorySessionProvider {
    /// Creates a provider issuing sessions valid for `lifespan`.
    #[must_use]
    pub fn new(lifespan: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            lifespan,
        }
    }

    /// Opens a session and returns its identifier.
    pub fn create(&self, subject: Subject, level: AuthenticationLevel) -> String {
        let id = generate_token();
        let now = OffsetDateTime::now_utc();
        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                subject,
                level,
                auth_time: now,
                expires_at: now + self.lifespan,
            },
        );
        id
    }

    /// Ends a session.
    pub fn destroy(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Drops expired sessions and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired());
        before - self.sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionProvider {
    async fn open(&self, subject: Subject, level: AuthenticationLevel) -> AuthResult<String> {
        Ok(self.create(subject, level))
    }

    async fn close(&self, session_id: &str) -> AuthResult<bool> {
        Ok(self.destroy(session_id))
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn get_session(&self, ctx: &RequestContext) -> AuthResult<Option<Session>> {
        let Some(id) = ctx.session_id.as_deref() else {
            return Ok(None);
        };

        let session = self.sessions.get(id).map(|s| s.clone());
        match session {
            Some(s) if s.is_expired() => {
                self.sessions.remove(id);
                Ok(None)
            }
            other => Ok(other),
        }
    }
}

/// A user entry for [`MemoryCredentialBackend`].
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Profile.
    pub subject: Subject,
    /// Password (argon2 PHC hash or `$plaintext$` value).
    pub password: ClientSecret,
    /// Disabled users cannot authenticate.
    pub disabled: bool,
}

/// Credential backend and user directory over a fixed user list.
#[derive(Debug, Default)]
pub struct MemoryCredentialBackend {
    users: HashMap<String, UserRecord>,
}

impl MemoryCredentialBackend {
    /// Creates a backend from user records.
    #[must_use]
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users: users
                .into_iter()
                .map(|u| (u.subject.username.clone(), u))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialBackend for MemoryCredentialBackend {
    async fn authenticate(
        &self,
        username: &str,
        credential: &str,
    ) -> AuthResult<AuthenticationLevel> {
        let Some(user) = self.users.get(username) else {
            ClientSecret::dummy_verify(credential);
            debug!(username, "Authentication attempt for unknown user");
            return Ok(AuthenticationLevel::NotAuthenticated);
        };

        if !user.password.verify(credential) {
            debug!(username, "Password mismatch");
            return Ok(AuthenticationLevel::NotAuthenticated);
        }
        if user.disabled {
            warn!(username, "Authentication attempt for disabled user");
            return Ok(AuthenticationLevel::NotAuthenticated);
        }

        Ok(AuthenticationLevel::OneFactor)
    }
}

#[async_trait]
impl UserDirectory for MemoryCredentialBackend {
    async fn user_details(&self, username: &str) -> AuthResult<Option<Subject>> {
        Ok(self
            .users
            .get(username)
            .filter(|u| !u.disabled)
            .map(|u| u.subject.clone()))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn john() -> Subject {
        Subject {
            username: "john".to_string(),
            display_name: "John Doe".to_string(),
            emails: vec!["john@example.com".to_string()],
            groups: vec!["admins".to_string(), "dev".to_string()],
        }
    }

    pub fn john_record() -> UserRecord {
        UserRecord {
            subject: john(),
            password: ClientSecret::Plaintext("password".to_string()),
            disabled: false,
        }
    }
}
