//! Request-interception layer.
//!
//! - [`forwarded`]: trusted `X-Forwarded-*` metadata
//! - [`redirect`]: the single open-redirect check
//! - [`cors`]: strict origin validation
//! - [`forward_auth`]: the allow / redirect / deny decision
//! - [`error`]: OAuth 2.0 error rendering for [`AuthError`](crate::AuthError)

pub mod cors;
pub mod error;
pub mod forward_auth;
pub mod forwarded;
pub mod redirect;

pub use cors::{CorsCheck, check_origin, cors_middleware, is_preflight};
pub use error::OAuthErrorBody;
pub use forward_auth::{Decision, ForwardAuthState, decide, forward_auth};
pub use forwarded::{ForwardedError, ForwardedRequest, PeerAddr, TrustedProxies, issuer};
pub use redirect::{RedirectGuard, host_within_domain};
