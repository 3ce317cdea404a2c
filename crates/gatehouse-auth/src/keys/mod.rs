//! Signing key management.
//!
//! - [`SigningKey`] - an immutable RS256 key pair
//! - [`KeyManager`] - active/retired key ring with atomic rotation
//! - [`Jwks`] - the published public key set

pub mod error;
pub mod jwks;
pub mod manager;
pub mod pair;

pub use error::JwtError;
pub use jwks::{Jwk, Jwks};
pub use manager::{KeyManager, KeyRing, KeyStatus, RetiredKey};
pub use pair::SigningKey;
