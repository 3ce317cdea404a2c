//! Token issuance and lifecycle.
//!
//! - [`claims`] - access token, ID token and userinfo claim sets
//! - [`service`] - token endpoint grants, introspection, revocation, userinfo
//! - [`introspection`] - RFC 7662 request and response types
//! - [`revocation`] - RFC 7009 request types

pub mod claims;
pub mod introspection;
pub mod revocation;
pub mod service;

pub use claims::{AccessTokenClaims, IdTokenClaims, ProfileClaims, UserInfo};
pub use introspection::{IntrospectionRequest, IntrospectionResponse};
pub use revocation::{RevocationRequest, TokenTypeHint};
pub use service::{TokenConfig, TokenService};
