//! Client secret storage and constant-time verification.
//!
//! Secrets are configured either as Argon2 PHC strings (`$argon2id$...`) or
//! as `$plaintext$<value>`. A bare value is treated as plaintext.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const PLAINTEXT_PREFIX: &str = "$plaintext$";

/// Errors parsing a configured client secret.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The value looked like a PHC hash but could not be parsed.
    #[error("Invalid secret hash: {0}")]
    InvalidHash(String),
}

/// A configured client secret.
#[derive(Clone, PartialEq, Eq)]
pub enum ClientSecret {
    /// Stored in plaintext.
    Plaintext(String),
    /// Argon2 PHC hash string.
    Hashed(String),
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plaintext(_) => f.write_str("ClientSecret::Plaintext(<redacted>)"),
            Self::Hashed(_) => f.write_str("ClientSecret::Hashed(<redacted>)"),
        }
    }
}

impl ClientSecret {
    /// Parses a configured secret value.
    ///
    /// # Errors
    /// Returns an error if an Argon2 hash is malformed.
    pub fn parse(value: &str) -> Result<Self, SecretError> {
        if let Some(plain) = value.strip_prefix(PLAINTEXT_PREFIX) {
            return Ok(Self::Plaintext(plain.to_string()));
        }
        if value.starts_with("$argon2") {
            let parsed =
                PasswordHash::new(value).map_err(|e| SecretError::InvalidHash(e.to_string()))?;
            if !matches!(parsed.algorithm.as_str(), "argon2id" | "argon2i" | "argon2d") {
                return Err(SecretError::InvalidHash(format!(
                    "unsupported algorithm '{}'",
                    parsed.algorithm
                )));
            }
            if parsed.salt.is_none() || parsed.hash.is_none() {
                return Err(SecretError::InvalidHash(
                    "PHC string has no salt or hash".to_string(),
                ));
            }
            return Ok(Self::Hashed(value.to_string()));
        }
        Ok(Self::Plaintext(value.to_string()))
    }

    /// Returns `true` if the secret is stored in plaintext.
    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext(_))
    }

    /// Verifies a presented secret.
    ///
    /// Plaintext secrets are compared as SHA-256 digests in constant time so
    /// neither the length nor the matching prefix of the stored value leaks.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        match self {
            Self::Plaintext(stored) => {
                digest(stored.as_bytes())
                    .as_slice()
                    .ct_eq(digest(presented.as_bytes()).as_slice())
                    .into()
            }
            Self::Hashed(phc) => match PasswordHash::new(phc) {
                Ok(parsed) => Argon2::default()
                    .verify_password(presented.as_bytes(), &parsed)
                    .is_ok(),
                Err(_) => false,
            },
        }
    }

    /// Performs a comparison whose cost resembles a real verification.
    ///
    /// Used when the client is unknown so response timing does not reveal
    /// whether the identifier exists.
    pub fn dummy_verify(presented: &str) {
        let stored = digest(b"gatehouse-unknown-client");
        let _: bool = stored
            .as_slice()
            .ct_eq(digest(presented.as_bytes()).as_slice())
            .into();
    }
}

/// Hashes a secret or password with Argon2id for storage.
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_secret(secret: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(secret.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn digest(value: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(value));
    out
}
