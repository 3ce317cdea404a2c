//! Pending consent state.
//!
//! A validated authorization request waits here until the subject accepts
//! or rejects it. Each pending consent can be decided exactly once.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::oauth::pkce::PkceChallenge;

/// A validated authorization request awaiting the subject's decision.
#[derive(Debug, Clone)]
pub struct PendingConsent {
    /// Consent identifier handed to the portal.
    pub id: String,
    /// Requesting client.
    pub client_id: String,
    /// Subject the consent belongs to.
    pub subject: String,
    /// Requested scopes, already checked against the client.
    pub scopes: Vec<String>,
    /// Requested audience, already checked against the client.
    pub audience: Vec<String>,
    /// Validated redirect URI.
    pub redirect_uri: String,
    /// Client state.
    pub state: Option<String>,
    /// PKCE challenge.
    pub pkce: Option<PkceChallenge>,
    /// OIDC nonce.
    pub nonce: Option<String>,
    /// Subject authentication time.
    pub auth_time: OffsetDateTime,
    /// Expiry.
    pub expires_at: OffsetDateTime,
}

/// In-memory pending consents keyed by identifier.
#[derive(Debug)]
pub struct ConsentStore {
    pending: DashMap<String, PendingConsent>,
    lifespan: Duration,
}

impl ConsentStore {
    /// Creates a store whose entries live for `lifespan`.
    #[must_use]
    pub fn new(lifespan: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            lifespan,
        }
    }

    /// Stores a pending consent and returns its identifier.
    ///
    /// `id` and `expires_at` on the passed value are overwritten.
    pub fn insert(&self, mut consent: PendingConsent) -> String {
        let id = Uuid::new_v4().to_string();
        consent.id = id.clone();
        consent.expires_at = OffsetDateTime::now_utc() + self.lifespan;
        self.pending.insert(id.clone(), consent);
        id
    }

    /// Returns the pending consent if it exists, belongs to `subject` and
    /// has not expired.
    #[must_use]
    pub fn get(&self, id: &str, subject: &str) -> Option<PendingConsent> {
        self.pending
            .get(id)
            .filter(|c| c.subject == subject && OffsetDateTime::now_utc() < c.expires_at)
            .map(|c| c.clone())
    }

    /// Removes and returns the pending consent. Only one caller can win.
    pub fn take(&self, id: &str, subject: &str) -> Option<PendingConsent> {
        let (_, consent) = self.pending.remove_if(id, |_, c| c.subject == subject)?;
        (OffsetDateTime::now_utc() < consent.expires_at).then_some(consent)
    }

    /// Drops expired entries.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.pending.len();
        self.pending.retain(|_, c| now < c.expires_at);
        before.saturating_sub(self.pending.len())
    }
}

/// A named item on the consent page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentItem {
    /// Scope or audience value.
    pub name: String,
    /// Human readable description.
    pub description: String,
}

/// What the portal shows the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentView {
    /// Requesting client.
    pub client_id: String,
    /// Client description.
    pub client_description: String,
    /// Requested scopes.
    pub scopes: Vec<ConsentItem>,
    /// Requested audience.
    pub audience: Vec<ConsentItem>,
}

/// The subject's decision.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsentDecision {
    /// Pending consent identifier.
    pub consent_id: String,
    /// `accept` or `reject`.
    pub accept_or_reject: String,
}

impl ConsentDecision {
    /// Returns `Some(true)` for accept, `Some(false)` for reject.
    #[must_use]
    pub fn accepted(&self) -> Option<bool> {
        match self.accept_or_reject.as_str() {
            "accept" => Some(true),
            "reject" => Some(false),
            _ => None,
        }
    }
}

/// Where the portal should send the browser after a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRedirect {
    /// Client redirect URI with the code or error attached.
    pub redirect_uri: String,
}

/// Describes a scope for display.
#[must_use]
pub fn scope_description(scope: &str) -> String {
    match scope {
        "openid" => "Use OpenID to verify your identity".to_string(),
        "profile" => "Access your display name".to_string(),
        "email" => "Access your email addresses".to_string(),
        "groups" => "Access your group membership".to_string(),
        "offline_access" => {
            "Automatically refresh these permissions without user interaction".to_string()
        }
        other => other.to_string(),
    }
}
