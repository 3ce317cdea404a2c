//! Authorization endpoint state machine.
//!
//! ```text
//! START -> validated -> AWAITING_CONSENT -> CODE_ISSUED
//!                    \-> LOGIN_REQUIRED (back to the portal)
//! ```
//!
//! Until the client and its redirect URI are validated, errors are shown to
//! the user directly. After that, every failure is delivered to the client's
//! redirect URI as an OAuth 2.0 error.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AuthResult;
use crate::clients::{Client, ClientRegistry, GrantType, split_space_list};
use crate::error::AuthError;
use crate::oauth::authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, AuthorizationResponse,
};
use crate::oauth::consent::{
    ConsentItem, ConsentStore, ConsentView, PendingConsent, scope_description,
};
use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod};
use crate::policy::Level;
use crate::session::Session;
use crate::store::{GrantRecord, GrantStore, TokenKind};

/// Lifetimes used by the authorization endpoint.
#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Authorization code lifetime.
    pub code_lifespan: Duration,
    /// How long a pending consent waits for a decision.
    pub consent_lifespan: Duration,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            code_lifespan: Duration::minutes(1),
            consent_lifespan: Duration::minutes(10),
        }
    }
}

/// What the caller should do after a valid authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// The subject must (re)authenticate to at least `required`.
    LoginRequired {
        /// Level the client demands.
        required: Level,
    },
    /// The subject must accept or reject the request.
    ConsentRequired {
        /// Pending consent identifier.
        consent_id: String,
    },
}

/// Failure at the authorization endpoint.
#[derive(Debug)]
pub enum AuthorizeError {
    /// The client or redirect URI could not be trusted; show the error to
    /// the user instead of redirecting.
    Direct(AuthError),
    /// Deliver the error to the client.
    Redirect {
        /// Validated client redirect URI.
        redirect_uri: String,
        /// Error to attach.
        error: AuthorizationError,
    },
}

impl AuthorizeError {
    /// Builds the client redirect for a [`AuthorizeError::Redirect`].
    ///
    /// Returns `None` for direct errors.
    #[must_use]
    pub fn redirect_url(&self) -> Option<String> {
        match self {
            Self::Direct(_) => None,
            Self::Redirect {
                redirect_uri,
                error,
            } => error.to_redirect_url(redirect_uri).ok(),
        }
    }
}

/// Validates authorization requests and issues authorization codes.
pub struct AuthorizationService {
    clients: Arc<dyn ClientRegistry>,
    grants: Arc<dyn GrantStore>,
    consents: ConsentStore,
    config: AuthorizationConfig,
}

impl AuthorizationService {
    /// Creates a new authorization service.
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        grants: Arc<dyn GrantStore>,
        config: AuthorizationConfig,
    ) -> Self {
        Self {
            clients,
            grants,
            consents: ConsentStore::new(config.consent_lifespan),
            config,
        }
    }

    /// The pending consent store.
    #[must_use]
    pub fn consents(&self) -> &ConsentStore {
        &self.consents
    }

    /// Processes an authorization request for the current session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizeError::Direct`] when the client or redirect URI is
    /// invalid and [`AuthorizeError::Redirect`] for every later failure.
    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        session: Option<&Session>,
    ) -> Result<AuthorizeOutcome, AuthorizeError> {
        let client = self.validate_client(request).await?;
        let redirect_uri = request.redirect_uri.clone().unwrap_or_default();
        let state = request.state.clone();

        let fail = |code: AuthorizationErrorCode, description: String| AuthorizeError::Redirect {
            redirect_uri: redirect_uri.clone(),
            error: AuthorizationError::with_description(code, description, state.clone()),
        };

        let response_type = request.response_type.as_deref().unwrap_or_default();
        if response_type.is_empty() {
            return Err(fail(
                AuthorizationErrorCode::InvalidRequest,
                "Missing response_type".to_string(),
            ));
        }
        if response_type != "code" || !client.allows_response_type(response_type) {
            return Err(fail(
                AuthorizationErrorCode::UnsupportedResponseType,
                format!("Unsupported response type: {response_type}"),
            ));
        }
        if !client.allows_grant_type(GrantType::AuthorizationCode) {
            return Err(fail(
                AuthorizationErrorCode::UnauthorizedClient,
                "Client is not allowed to use the authorization code grant".to_string(),
            ));
        }

        let response_mode = request.response_mode.as_deref().unwrap_or("query");
        if response_mode != "query" || !client.allows_response_mode(response_mode) {
            return Err(fail(
                AuthorizationErrorCode::InvalidRequest,
                format!("Unsupported response mode: {response_mode}"),
            ));
        }

        let scopes = split_space_list(request.scope.as_deref());
        let unknown = client.unregistered_scopes(&scopes);
        if !unknown.is_empty() {
            return Err(fail(
                AuthorizationErrorCode::InvalidScope,
                format!("Scopes not allowed for this client: {}", unknown.join(" ")),
            ));
        }

        let audience = split_space_list(request.audience.as_deref());
        let unknown = client.unregistered_audience(&audience);
        if !unknown.is_empty() {
            return Err(fail(
                AuthorizationErrorCode::InvalidRequest,
                format!("Audience not allowed for this client: {}", unknown.join(" ")),
            ));
        }

        let pkce = self
            .validate_pkce(&client, request)
            .map_err(|e| fail(AuthorizationErrorCode::InvalidRequest, e.public_description()))?;

        if client.policy == Level::Deny {
            warn!(client_id = %client.id, "Authorization denied by client policy");
            return Err(fail(
                AuthorizationErrorCode::AccessDenied,
                "The client is not allowed to authorize users".to_string(),
            ));
        }

        let required = client.policy.max(Level::OneFactor);
        let Some(session) = session.filter(|s| required.is_satisfied_by(s.level)) else {
            debug!(client_id = %client.id, %required, "Login required for authorization");
            return Ok(AuthorizeOutcome::LoginRequired { required });
        };

        let consent_id = self.consents.insert(PendingConsent {
            id: String::new(),
            client_id: client.id.clone(),
            subject: session.subject.username.clone(),
            scopes,
            audience,
            redirect_uri,
            state,
            pkce,
            nonce: request.nonce.clone(),
            auth_time: session.auth_time,
            expires_at: OffsetDateTime::now_utc(),
        });

        debug!(client_id = %client.id, subject = %session.subject.username, "Awaiting consent");
        Ok(AuthorizeOutcome::ConsentRequired { consent_id })
    }

    async fn validate_client(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<Arc<Client>, AuthorizeError> {
        let client_id = request
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthorizeError::Direct(AuthError::invalid_request("Missing client_id")))?;

        let client = self
            .clients
            .lookup(client_id)
            .await
            .map_err(|e| AuthorizeError::Direct(e.into()))?;

        let redirect_uri = request.redirect_uri.as_deref().ok_or_else(|| {
            AuthorizeError::Direct(AuthError::invalid_request("Missing redirect_uri"))
        })?;
        if !client.is_redirect_uri_allowed(redirect_uri) {
            warn!(client_id = %client.id, "Rejected unregistered redirect_uri");
            return Err(AuthorizeError::Direct(AuthError::invalid_request(
                "The redirect_uri is not registered for this client",
            )));
        }

        Ok(client)
    }

    fn validate_pkce(
        &self,
        client: &Client,
        request: &AuthorizationRequest,
    ) -> AuthResult<Option<PkceChallenge>> {
        match request.code_challenge.as_deref() {
            Some(challenge) => {
                let method = PkceChallengeMethod::parse(request.code_challenge_method.as_deref())?;
                Ok(Some(PkceChallenge::new(challenge, method)?))
            }
            None if request.code_challenge_method.is_some() => Err(AuthError::invalid_request(
                "code_challenge_method without code_challenge",
            )),
            None if client.public => Err(AuthError::invalid_request(
                "Public clients must use PKCE",
            )),
            None => Ok(None),
        }
    }

    /// Describes a pending consent for the portal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the consent does not exist, expired, or belongs
    /// to someone else.
    pub async fn describe(&self, consent_id: &str, subject: &str) -> AuthResult<ConsentView> {
        let consent = self
            .consents
            .get(consent_id, subject)
            .ok_or_else(|| AuthError::not_found("consent"))?;
        let client = self.clients.lookup(&consent.client_id).await?;

        Ok(ConsentView {
            client_id: client.id.clone(),
            client_description: client.description.clone(),
            scopes: consent
                .scopes
                .iter()
                .map(|s| ConsentItem {
                    name: s.clone(),
                    description: scope_description(s),
                })
                .collect(),
            audience: consent
                .audience
                .iter()
                .map(|a| ConsentItem {
                    name: a.clone(),
                    description: a.clone(),
                })
                .collect(),
        })
    }

    /// Records the subject's decision and returns the client redirect URL.
    ///
    /// Accepting issues a single-use authorization code; rejecting returns
    /// an `access_denied` error redirect.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or already decided consent, or a
    /// server error if the code cannot be stored.
    pub async fn decide(
        &self,
        consent_id: &str,
        subject: &str,
        accept: bool,
        issuer: &str,
    ) -> AuthResult<String> {
        let consent = self
            .consents
            .take(consent_id, subject)
            .ok_or_else(|| AuthError::not_found("consent"))?;

        if !accept {
            info!(client_id = %consent.client_id, subject, "Consent rejected");
            return AuthorizationError::with_description(
                AuthorizationErrorCode::AccessDenied,
                "The resource owner denied the request",
                consent.state,
            )
            .to_redirect_url(&consent.redirect_uri)
            .map_err(|e| AuthError::internal(e.to_string()));
        }

        let record = GrantRecord::new(
            TokenKind::AuthorizationCode,
            Uuid::new_v4().to_string(),
            &consent.client_id,
            self.config.code_lifespan,
        )
        .with_subject(subject)
        .with_scopes(consent.scopes)
        .with_audience(consent.audience)
        .with_redirect_uri(&consent.redirect_uri)
        .with_pkce(consent.pkce)
        .with_nonce(consent.nonce)
        .with_auth_time(Some(consent.auth_time));

        let code = self.grants.issue_authorization_code(record).await?;
        info!(client_id = %consent.client_id, subject, "Authorization code issued");

        AuthorizationResponse {
            code,
            state: consent.state,
            iss: issuer.to_string(),
        }
        .to_redirect_url(&consent.redirect_uri)
        .map_err(|e| AuthError::internal(e.to_string()))
    }
}
