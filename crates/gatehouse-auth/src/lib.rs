//! # gatehouse-auth
//!
//! OpenID Connect provider core and forward-authentication policy engine.
//!
//! This crate provides:
//! - Authorization code (with PKCE), refresh and client credentials grants
//! - Token introspection and revocation
//! - Signing-key rotation with a JWKS endpoint
//! - An ordered, first-match-wins access control engine
//! - The forward-auth decision used by reverse proxies
//!
//! ## Modules
//!
//! - [`config`] - Gateway configuration and validation
//! - [`clients`] - Registered OAuth clients
//! - [`keys`] - Signing keys and their rotation
//! - [`store`] - Grant store with exactly-once code exchange
//! - [`oauth`] - Authorization endpoint, PKCE and client authentication
//! - [`token`] - Token endpoint, introspection, revocation and userinfo
//! - [`policy`] - Access control rules
//! - [`session`] - Session and credential collaborators
//! - [`middleware`] - Forwarded headers, CORS, redirect safety, forward-auth
//! - [`discovery`] - OpenID provider metadata
//! - [`http`] - Axum router and handlers

pub mod clients;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod keys;
pub mod middleware;
pub mod oauth;
pub mod policy;
pub mod session;
pub mod store;
pub mod token;

pub use config::{AuthConfig, ConfigError, ValidationReport};
pub use discovery::WellKnownConfiguration;
pub use error::{AuthError, ErrorCategory};
pub use http::{Collaborators, GatewayState, router};
pub use keys::{JwtError, KeyManager, SigningKey};
pub use middleware::{ForwardAuthState, RedirectGuard, TrustedProxies};
pub use policy::{AuthenticationLevel, Level, PolicyEngine, RuleSet};
pub use session::{
    CredentialBackend, MemoryCredentialBackend, MemorySessionProvider, RequestContext, Session,
    SessionProvider, SessionStore, Subject, UserDirectory,
};
pub use store::{GrantStore, LayeredGrantStore, MemoryGrantStore, StoreError, TimeoutGrantStore};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;
