//! OAuth 2.0 / OpenID Connect protocol flows.
//!
//! - [`authorize`] - authorization endpoint request and response types
//! - [`service`] - authorization request validation and code issuance
//! - [`consent`] - pending consent state
//! - [`client_auth`] - token endpoint client authentication
//! - [`pkce`] - Proof Key for Code Exchange (RFC 7636)
//! - [`token`] - token endpoint request and response types

pub mod authorize;
pub mod client_auth;
pub mod consent;
pub mod pkce;
pub mod service;
pub mod token;

pub use authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, AuthorizationResponse,
};
pub use client_auth::{
    AuthenticatedClient, ClientAuthenticator, ClientCredentials, JWT_BEARER_ASSERTION_TYPE,
    parse_basic_auth,
};
pub use consent::{ConsentDecision, ConsentItem, ConsentRedirect, ConsentStore, ConsentView};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use service::{AuthorizationConfig, AuthorizationService, AuthorizeError, AuthorizeOutcome};
pub use token::{TokenRequest, TokenResponse};
