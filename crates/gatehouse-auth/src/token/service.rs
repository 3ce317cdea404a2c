//! Token endpoint, introspection, revocation and userinfo.
//!
//! Every token is signed with the key manager's active key. Access and
//! refresh tokens are recorded in the grant store so they can be
//! introspected and revoked; a replayed code or refresh token revokes the
//! whole grant it belongs to.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AuthResult;
use crate::clients::{Client, GrantType, split_space_list};
use crate::error::AuthError;
use crate::keys::KeyManager;
use crate::oauth::pkce::PkceVerifier;
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::session::UserDirectory;
use crate::store::{GrantRecord, GrantStore, StoreError, TokenKind};
use crate::token::claims::{AccessTokenClaims, IdTokenClaims, ProfileClaims, UserInfo};
use crate::token::introspection::IntrospectionResponse;
use crate::token::revocation::TokenTypeHint;

/// Scopes that only make sense for an end user.
const USER_ONLY_SCOPES: [&str; 2] = ["openid", "offline_access"];

/// Configuration for the token service.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Access token lifetime.
    pub access_token_lifespan: Duration,
    /// Refresh token lifetime.
    pub refresh_token_lifespan: Duration,
    /// ID token lifetime.
    pub id_token_lifespan: Duration,
    /// Clients allowed to introspect and revoke tokens issued to others.
    pub privileged_clients: Vec<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifespan: Duration::hours(1),
            refresh_token_lifespan: Duration::minutes(90),
            id_token_lifespan: Duration::hours(1),
            privileged_clients: Vec::new(),
        }
    }
}

/// Issues and manages tokens.
pub struct TokenService {
    keys: Arc<KeyManager>,
    grants: Arc<dyn GrantStore>,
    users: Arc<dyn UserDirectory>,
    config: TokenConfig,
}

impl TokenService {
    /// Creates a new token service.
    #[must_use]
    pub fn new(
        keys: Arc<KeyManager>,
        grants: Arc<dyn GrantStore>,
        users: Arc<dyn UserDirectory>,
        config: TokenConfig,
    ) -> Self {
        Self {
            keys,
            grants,
            users,
            config,
        }
    }

    /// Gets the configuration.
    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Handles a token request from an authenticated client.
    ///
    /// # Errors
    ///
    /// - `UnsupportedGrantType` for an unknown grant
    /// - `UnauthorizedClient` if the client did not register the grant
    /// - grant-specific errors from the individual flows
    pub async fn exchange(
        &self,
        request: &TokenRequest,
        client: &Client,
        issuer: &str,
    ) -> AuthResult<TokenResponse> {
        if request.grant_type.is_empty() {
            return Err(AuthError::invalid_request("Missing grant_type"));
        }
        let grant_type = GrantType::parse(&request.grant_type)
            .filter(|g| *g != GrantType::Implicit)
            .ok_or_else(|| AuthError::unsupported_grant_type(&request.grant_type))?;

        if !client.allows_grant_type(grant_type) {
            return Err(AuthError::unauthorized_client(format!(
                "Client is not allowed to use the {grant_type} grant"
            )));
        }

        match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(request, client, issuer).await,
            GrantType::ClientCredentials => self.client_credentials(request, client, issuer).await,
            GrantType::RefreshToken => self.refresh(request, client, issuer).await,
            GrantType::Implicit => Err(AuthError::unsupported_grant_type(&request.grant_type)),
        }
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` (or `Conflict` for a replay, reported as
    /// `invalid_grant`) if the code is unknown, expired, used, issued to
    /// another client, bound to another redirect URI, or fails PKCE.
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
        client: &Client,
        issuer: &str,
    ) -> AuthResult<TokenResponse> {
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_request("Missing code parameter"))?;

        let record = match self.grants.exchange_code(code).await {
            Ok(record) => record,
            Err(StoreError::AlreadyUsed) => {
                self.revoke_replayed(code).await;
                return Err(StoreError::AlreadyUsed.into());
            }
            Err(e) => return Err(e.into()),
        };

        if record.client_id != client.id {
            warn!(client_id = %client.id, "Authorization code presented by another client");
            return Err(AuthError::invalid_grant(
                "Authorization code was issued to a different client",
            ));
        }

        if let Some(ref expected) = record.redirect_uri {
            if request.redirect_uri.as_deref() != Some(expected.as_str()) {
                return Err(AuthError::invalid_grant(
                    "Redirect URI does not match authorization request",
                ));
            }
        }

        match (&record.pkce, request.code_verifier.as_deref()) {
            (Some(challenge), Some(verifier)) => challenge.verify(&PkceVerifier::new(verifier)?)?,
            (Some(_), None) => {
                return Err(AuthError::invalid_grant("Missing code_verifier parameter"));
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid_grant(
                    "code_verifier supplied but no code_challenge was registered",
                ));
            }
            (None, None) => {}
        }

        let access_token = self
            .mint_access_token(&record, record.scopes.clone(), issuer)
            .await?;
        let refresh_token = self.mint_refresh_token(&record, client).await?;
        let id_token = self.mint_id_token(&record, issuer).await?;

        info!(
            client_id = %client.id,
            refresh = refresh_token.is_some(),
            id_token = id_token.is_some(),
            "Authorization code exchanged"
        );

        Ok(self
            .response(access_token, &record.scopes)
            .with_refresh_token(refresh_token)
            .with_id_token(id_token))
    }

    /// Issues a machine-to-machine access token.
    ///
    /// No subject is involved, so access policy is not consulted; the token
    /// is limited to the scopes and audience the client registered.
    ///
    /// # Errors
    ///
    /// - `UnauthorizedClient` for public clients
    /// - `InvalidScope` for unregistered or user-only scopes
    /// - `InvalidRequest` for an unregistered audience
    pub async fn client_credentials(
        &self,
        request: &TokenRequest,
        client: &Client,
        issuer: &str,
    ) -> AuthResult<TokenResponse> {
        if client.public {
            return Err(AuthError::unauthorized_client(
                "Public clients cannot use the client_credentials grant",
            ));
        }

        let scopes = split_space_list(request.scope.as_deref());
        let unknown = client.unregistered_scopes(&scopes);
        if !unknown.is_empty() {
            return Err(AuthError::invalid_scope(format!(
                "Scopes not allowed for this client: {}",
                unknown.join(" ")
            )));
        }
        if let Some(scope) = scopes.iter().find(|s| USER_ONLY_SCOPES.contains(&s.as_str())) {
            return Err(AuthError::invalid_scope(format!(
                "The {scope} scope cannot be used with client_credentials"
            )));
        }

        let audience = split_space_list(request.audience.as_deref());
        let unknown = client.unregistered_audience(&audience);
        if !unknown.is_empty() {
            return Err(AuthError::invalid_request(format!(
                "Audience not allowed for this client: {}",
                unknown.join(" ")
            )));
        }

        let grant = GrantRecord::new(
            TokenKind::AccessToken,
            Uuid::new_v4().to_string(),
            &client.id,
            self.config.access_token_lifespan,
        )
        .with_audience(audience);

        let access_token = self.mint_access_token(&grant, scopes.clone(), issuer).await?;
        info!(client_id = %client.id, "Client credentials token issued");

        Ok(self.response(access_token, &scopes))
    }

    /// Refreshes an access token and rotates the refresh token.
    ///
    /// The requested scope may narrow, never widen, the original grant. No
    /// new ID token is issued.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` for an unknown, expired, revoked or foreign
    /// refresh token, `Conflict` for a replayed one and `InvalidScope` when
    /// the requested scope exceeds the grant.
    pub async fn refresh(
        &self,
        request: &TokenRequest,
        client: &Client,
        issuer: &str,
    ) -> AuthResult<TokenResponse> {
        let token = request
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::invalid_request("Missing refresh_token parameter"))?;

        let stored = match self.grants.find(token).await {
            Ok(record) if record.kind == TokenKind::RefreshToken => record,
            Ok(_) | Err(StoreError::NotFound) => {
                return Err(AuthError::invalid_grant("Invalid refresh token"));
            }
            Err(e) => return Err(e.into()),
        };

        if stored.client_id != client.id {
            warn!(client_id = %client.id, "Refresh token presented by another client");
            return Err(AuthError::invalid_grant(
                "Refresh token was issued to a different client",
            ));
        }

        let scopes = narrow_scopes(request.scope.as_deref(), &stored.scopes)?;

        let record = match self.grants.consume_refresh_token(token).await {
            Ok(record) => record,
            Err(StoreError::AlreadyUsed) => {
                self.revoke_replayed(token).await;
                return Err(StoreError::AlreadyUsed.into());
            }
            Err(e) => return Err(e.into()),
        };

        let access_token = self.mint_access_token(&record, scopes.clone(), issuer).await?;

        let mut next = record.derive(TokenKind::RefreshToken, self.config.refresh_token_lifespan);
        next.expires_at = record.expires_at;
        let refresh_token = self.grants.issue_refresh_token(next).await?;

        debug!(client_id = %client.id, "Refresh token rotated");

        Ok(self
            .response(access_token, &scopes)
            .with_refresh_token(Some(refresh_token)))
    }

    /// Introspects a token for an authenticated caller.
    ///
    /// Callers only learn about tokens issued to them unless they are
    /// privileged. Anything else is reported as inactive.
    ///
    /// # Errors
    ///
    /// Returns an error only if the grant store is unavailable.
    pub async fn introspect(
        &self,
        token: &str,
        caller: &Client,
        issuer: &str,
    ) -> AuthResult<IntrospectionResponse> {
        let status = self.grants.introspect(token).await?;
        let Some(record) = status.record.filter(|_| status.active) else {
            return Ok(IntrospectionResponse::inactive());
        };

        if !self.is_entitled(caller, &record) {
            debug!(client_id = %caller.id, "Introspection of a foreign token");
            return Ok(IntrospectionResponse::inactive());
        }

        Ok(IntrospectionResponse::active(&record, issuer))
    }

    /// Revokes a token for an authenticated caller.
    ///
    /// Unknown tokens and tokens owned by another client are ignored.
    /// Revoking a refresh token revokes the whole grant.
    ///
    /// # Errors
    ///
    /// Returns an error only if the grant store is unavailable.
    pub async fn revoke(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
        caller: &Client,
    ) -> AuthResult<()> {
        let record = match self.grants.find(token).await {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                debug!(client_id = %caller.id, "Revocation of an unknown token");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !self.is_entitled(caller, &record) {
            debug!(client_id = %caller.id, "Revocation of a foreign token ignored");
            return Ok(());
        }

        if let Some(hint) = hint.filter(|h| !h.matches(record.kind)) {
            debug!(%hint, kind = record.kind.as_str(), "token_type_hint did not match");
        }

        match record.kind {
            TokenKind::RefreshToken => {
                let revoked = self.grants.revoke_grant(&record.grant_id).await?;
                info!(client_id = %caller.id, revoked, "Refresh token revoked with its grant");
            }
            TokenKind::AccessToken => {
                self.grants.revoke(token).await?;
                info!(client_id = %caller.id, "Access token revoked");
            }
            TokenKind::AuthorizationCode => {}
        }
        Ok(())
    }

    /// Returns the claims the bearer of an access token may see.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` if the token is not a valid, active access
    /// token for an end user of this issuer.
    pub async fn userinfo(&self, bearer: &str, issuer: &str) -> AuthResult<UserInfo> {
        let claims = self.keys.verify::<AccessTokenClaims>(bearer)?.claims;
        if claims.iss != issuer {
            return Err(AuthError::invalid_token("Token was issued by another issuer"));
        }

        let status = self.grants.introspect(bearer).await?;
        let Some(record) = status.record.filter(|_| status.active) else {
            return Err(AuthError::invalid_token("The access token is not active"));
        };
        let Some(username) = record.subject.as_deref() else {
            return Err(AuthError::invalid_token("The access token has no end user"));
        };

        let subject = self
            .users
            .user_details(username)
            .await?
            .ok_or_else(|| AuthError::invalid_token("The token subject no longer exists"))?;

        Ok(UserInfo {
            sub: username.to_string(),
            profile: ProfileClaims::for_scopes(&subject, &record.scopes),
        })
    }

    fn is_entitled(&self, caller: &Client, record: &GrantRecord) -> bool {
        record.client_id == caller.id || self.config.privileged_clients.contains(&caller.id)
    }

    fn response(&self, access_token: String, scopes: &[String]) -> TokenResponse {
        let expires_in = u64::try_from(self.config.access_token_lifespan.whole_seconds())
            .unwrap_or_default();
        TokenResponse::new(access_token, expires_in, scopes.join(" "))
    }

    async fn mint_access_token(
        &self,
        grant: &GrantRecord,
        scopes: Vec<String>,
        issuer: &str,
    ) -> AuthResult<String> {
        let lifespan = self.config.access_token_lifespan;
        let subject = grant
            .subject
            .clone()
            .unwrap_or_else(|| grant.client_id.clone());

        let claims = AccessTokenClaims::builder(issuer, subject, &grant.client_id)
            .audience(grant.audience.clone())
            .expires_in(lifespan)
            .scopes(&scopes)
            .build();
        let token = self
            .keys
            .sign(&claims)
            .map_err(|e| AuthError::internal(format!("Failed to sign access token: {e}")))?;

        let record = grant
            .derive(TokenKind::AccessToken, lifespan)
            .with_scopes(scopes);
        self.grants.issue_access_token(&token, record).await?;
        Ok(token)
    }

    async fn mint_refresh_token(
        &self,
        grant: &GrantRecord,
        client: &Client,
    ) -> AuthResult<Option<String>> {
        if !grant.has_scope("offline_access") || !client.allows_grant_type(GrantType::RefreshToken)
        {
            return Ok(None);
        }
        let record = grant.derive(TokenKind::RefreshToken, self.config.refresh_token_lifespan);
        Ok(Some(self.grants.issue_refresh_token(record).await?))
    }

    async fn mint_id_token(&self, grant: &GrantRecord, issuer: &str) -> AuthResult<Option<String>> {
        if !grant.has_scope("openid") {
            return Ok(None);
        }
        let Some(username) = grant.subject.as_deref() else {
            return Ok(None);
        };

        let subject = self.users.user_details(username).await?.ok_or_else(|| {
            warn!(username, "ID token requested for an unknown user");
            AuthError::invalid_grant("The subject no longer exists")
        })?;

        let now = OffsetDateTime::now_utc();
        let claims = IdTokenClaims {
            iss: issuer.to_string(),
            sub: username.to_string(),
            aud: vec![grant.client_id.clone()],
            exp: (now + self.config.id_token_lifespan).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            azp: grant.client_id.clone(),
            auth_time: grant.auth_time.map(OffsetDateTime::unix_timestamp),
            nonce: grant.nonce.clone(),
            profile: ProfileClaims::for_scopes(&subject, &grant.scopes),
        };

        self.keys
            .sign(&claims)
            .map(Some)
            .map_err(|e| AuthError::internal(format!("Failed to sign ID token: {e}")))
    }

    async fn revoke_replayed(&self, token: &str) {
        let record = match self.grants.find(token).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Replayed grant artifact could not be resolved");
                return;
            }
        };

        match self.grants.revoke_grant(&record.grant_id).await {
            Ok(revoked) => warn!(
                client_id = %record.client_id,
                grant_id = %record.grant_id,
                revoked,
                "Replayed grant artifact, grant revoked"
            ),
            Err(e) => error!(error = %e, grant_id = %record.grant_id, "Failed to revoke replayed grant"),
        }
    }
}

/// Narrows a refresh to the requested scopes.
fn narrow_scopes(requested: Option<&str>, granted: &[String]) -> AuthResult<Vec<String>> {
    let requested = split_space_list(requested);
    if requested.is_empty() {
        return Ok(granted.to_vec());
    }
    if let Some(extra) = requested.iter().find(|s| !granted.contains(s)) {
        return Err(AuthError::invalid_scope(format!(
            "Requested scope exceeds original grant: {extra}"
        )));
    }
    Ok(requested)
}
