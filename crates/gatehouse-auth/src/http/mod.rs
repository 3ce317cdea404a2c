//! HTTP surface of the gateway.
//!
//! - `GET /.well-known/openid-configuration` - discovery
//! - `GET {jwks_path}` - public signing keys
//! - `GET {authorization_path}` - authorization endpoint
//! - `GET/POST {consent_path}` - consent for the portal
//! - `POST {token_path}` - token endpoint
//! - `POST {introspection_path}` - introspection (RFC 7662)
//! - `POST {revocation_path}` - revocation (RFC 7009)
//! - `GET/POST {userinfo_path}` - userinfo
//! - `POST /api/firstfactor`, `POST /api/logout` - portal login
//! - `GET /api/verify` - forward-auth
//! - `GET /api/health` - health check
//!
//! Every route except forward-auth is wrapped by the strict CORS check;
//! forward-auth applies the check against the forwarded request itself.

pub mod authorize;
pub mod discovery;
pub mod portal;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::HeaderMap,
    middleware,
    routing::{get, post},
};
use url::Url;

use crate::AuthResult;
use crate::clients::{ClientRegistry, StaticClientRegistry};
use crate::config::{AuthConfig, ConfigError, OidcConfig, lifespan};
use crate::error::AuthError;
use crate::keys::KeyManager;
use crate::middleware::{
    ForwardAuthState, RedirectGuard, TrustedProxies, cors_middleware, forward_auth, issuer,
};
use crate::oauth::{AuthorizationConfig, AuthorizationService, ClientAuthenticator};
use crate::policy::PolicyEngine;
use crate::session::{
    CredentialBackend, RequestContext, Session, SessionProvider, SessionStore, UserDirectory,
    load_session,
};
use crate::store::GrantStore;
use crate::token::{TokenConfig, TokenService};

/// Forward-auth endpoint path.
pub const VERIFY_PATH: &str = "/api/verify";
/// Health check path.
pub const HEALTH_PATH: &str = "/api/health";
/// Discovery document path.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
/// RFC 8414 alias of the discovery document.
pub const AUTHORIZATION_SERVER_METADATA_PATH: &str = "/.well-known/oauth-authorization-server";

/// External collaborators the gateway consumes.
#[derive(Clone)]
pub struct Collaborators {
    /// Session lookup.
    pub sessions: Arc<dyn SessionProvider>,
    /// Session creation for the portal.
    pub session_store: Arc<dyn SessionStore>,
    /// Credential verification.
    pub credentials: Arc<dyn CredentialBackend>,
    /// Profile lookup for userinfo.
    pub users: Arc<dyn UserDirectory>,
}

/// Shared state of every handler.
#[derive(Clone)]
pub struct GatewayState {
    /// Forward-auth state; also holds the session settings.
    pub forward: ForwardAuthState,
    /// OIDC paths and lifespans.
    pub oidc: Arc<OidcConfig>,
    /// Signing keys.
    pub keys: Arc<KeyManager>,
    /// Client authentication.
    pub authenticator: Arc<ClientAuthenticator>,
    /// Authorization endpoint logic.
    pub authorization: Arc<AuthorizationService>,
    /// Token endpoint logic.
    pub tokens: Arc<TokenService>,
    /// Session creation.
    pub session_store: Arc<dyn SessionStore>,
    /// Credential verification.
    pub credentials: Arc<dyn CredentialBackend>,
    /// Profile lookup.
    pub users: Arc<dyn UserDirectory>,
}

impl FromRef<GatewayState> for ForwardAuthState {
    fn from_ref(state: &GatewayState) -> Self {
        state.forward.clone()
    }
}

impl GatewayState {
    /// Wires the gateway from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if clients, rules, proxies or the portal URL are
    /// invalid.
    pub fn from_config(
        config: &AuthConfig,
        keys: Arc<KeyManager>,
        grants: Arc<dyn GrantStore>,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        let registry: Arc<dyn ClientRegistry> = Arc::new(
            StaticClientRegistry::new(config.clients()?).map_err(ConfigError::InvalidValue)?,
        );
        let policy = Arc::new(PolicyEngine::new(config.rule_set()?));
        let portal_url = Url::parse(&config.session.portal_url)
            .map_err(|e| ConfigError::InvalidValue(format!("session.portal_url: {e}")))?;

        let forward = ForwardAuthState {
            policy,
            sessions: collaborators.sessions,
            guard: RedirectGuard::new(config.session.domain.clone()),
            trusted: TrustedProxies::new(config.server.networks()?),
            portal_url,
            cookie_name: config.session.cookie_name.clone(),
            store_timeout: config.session.store_timeout,
            retry_backoff: config.session.retry_backoff,
            production_mode: config.server.production_mode,
        };

        let authorization = AuthorizationService::new(
            registry.clone(),
            grants.clone(),
            AuthorizationConfig {
                code_lifespan: lifespan(config.oidc.authorization_code_lifespan),
                consent_lifespan: lifespan(config.oidc.consent_lifespan),
            },
        );

        let tokens = TokenService::new(
            keys.clone(),
            grants,
            collaborators.users.clone(),
            TokenConfig {
                access_token_lifespan: lifespan(config.oidc.access_token_lifespan),
                refresh_token_lifespan: lifespan(config.oidc.refresh_token_lifespan),
                id_token_lifespan: lifespan(config.oidc.id_token_lifespan),
                privileged_clients: config.oidc.privileged_clients.clone(),
            },
        );

        Ok(Self {
            forward,
            oidc: Arc::new(config.oidc.clone()),
            keys,
            authenticator: Arc::new(ClientAuthenticator::new(registry)),
            authorization: Arc::new(authorization),
            tokens: Arc::new(tokens),
            session_store: collaborators.session_store,
            credentials: collaborators.credentials,
            users: collaborators.users,
        })
    }

    /// Issuer for a request, from the trusted forwarded host.
    pub(crate) fn issuer(&self, peer: Option<std::net::IpAddr>, headers: &HeaderMap) -> AuthResult<String> {
        issuer(headers, peer, &self.forward.trusted)
            .map_err(|e| AuthError::invalid_request(e.to_string()))
    }

    /// Session attached to a request, if any.
    pub(crate) async fn session(&self, headers: &HeaderMap) -> AuthResult<Option<Session>> {
        let ctx = RequestContext {
            session_id: axum_extra::extract::CookieJar::from_headers(headers)
                .get(&self.forward.cookie_name)
                .map(|c| c.value().to_string()),
            remote_ip: None,
        };
        load_session(
            self.forward.sessions.as_ref(),
            &ctx,
            self.forward.store_timeout,
            self.forward.retry_backoff,
        )
        .await
    }

    /// Renders an error honoring the production flag.
    pub(crate) fn error(&self, error: AuthError) -> axum::response::Response {
        error.to_response(self.forward.production_mode)
    }
}

/// Builds the gateway router.
pub fn router(state: GatewayState) -> Router {
    let oidc = state.oidc.clone();

    let provider = Router::new()
        .route(DISCOVERY_PATH, get(discovery::openid_configuration))
        .route(
            AUTHORIZATION_SERVER_METADATA_PATH,
            get(discovery::openid_configuration),
        )
        .route(&oidc.jwks_path, get(discovery::jwks))
        .route(&oidc.authorization_path, get(authorize::authorize))
        .route(
            &oidc.consent_path,
            get(authorize::consent_get).post(authorize::consent_post),
        )
        .route(&oidc.token_path, post(token::token))
        .route(&oidc.introspection_path, post(token::introspect))
        .route(&oidc.revocation_path, post(token::revoke))
        .route(
            &oidc.userinfo_path,
            get(userinfo::userinfo).post(userinfo::userinfo),
        )
        .route(portal::FIRST_FACTOR_PATH, post(portal::first_factor))
        .route(portal::LOGOUT_PATH, post(portal::logout))
        .route(HEALTH_PATH, get(portal::health))
        .route("/", get(portal::index))
        .fallback(portal::redirect_to_root)
        .layer(middleware::from_fn_with_state(
            state.forward.guard.clone(),
            cors_middleware,
        ));

    Router::new()
        .route(VERIFY_PATH, get(forward_auth))
        .merge(provider)
        .with_state(state)
}
