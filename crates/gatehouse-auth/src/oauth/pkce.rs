//! PKCE (Proof Key for Code Exchange) implementation.
//!
//! Implements RFC 7636 with both the `plain` and `S256` methods.
//!
//! # Example
//!
//! ```
//! use gatehouse_auth::oauth::pkce::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
//!
//! assert!(challenge.verify(&verifier).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be unreserved ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// Challenge format is invalid.
    #[error("Invalid challenge format")]
    InvalidChallengeFormat,

    /// Unsupported challenge method.
    #[error("Unsupported challenge method: {0}")]
    UnsupportedMethod(String),

    /// PKCE verification failed (verifier doesn't match challenge).
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// Returns `true` if this is a verification failure.
    #[must_use]
    pub fn is_verification_error(&self) -> bool {
        matches!(self, Self::VerificationFailed)
    }

    /// Get the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidVerifierLength(_)
            | Self::InvalidVerifierCharacters
            | Self::InvalidChallengeFormat
            | Self::UnsupportedMethod(_) => "invalid_request",
            Self::VerificationFailed => "invalid_grant",
        }
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkceChallengeMethod {
    /// The challenge is the verifier itself.
    #[serde(rename = "plain")]
    Plain,
    /// The challenge is `BASE64URL(SHA256(verifier))`.
    S256,
}

impl PkceChallengeMethod {
    /// Parse challenge method from string.
    ///
    /// An absent method defaults to `plain` per RFC 7636 Section 4.3.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything else.
    pub fn parse(method: Option<&str>) -> Result<Self, PkceError> {
        match method {
            None | Some("plain") => Ok(Self::Plain),
            Some("S256") => Ok(Self::S256),
            Some(other) => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier.
///
/// 43 to 128 characters from `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a new verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the length or character set is invalid.
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        validate_unreserved(&verifier)?;
        Ok(Self(verifier))
    }

    /// Generate a cryptographically random verifier (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_unreserved(value: &str) -> Result<(), PkceError> {
    let len = value.len();
    if !(43..=128).contains(&len) {
        return Err(PkceError::InvalidVerifierLength(len));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
    {
        return Err(PkceError::InvalidVerifierCharacters);
    }
    Ok(())
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// PKCE code challenge together with the method it was created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    challenge: String,
    method: PkceChallengeMethod,
}

impl PkceChallenge {
    /// Create a challenge from a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier, method: PkceChallengeMethod) -> Self {
        Self {
            challenge: transform(verifier.as_str(), method),
            method,
        }
    }

    /// Create a challenge from the raw values sent by the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the challenge is malformed for its method.
    pub fn new(challenge: impl Into<String>, method: PkceChallengeMethod) -> Result<Self, PkceError> {
        let challenge = challenge.into();
        match method {
            PkceChallengeMethod::Plain => validate_unreserved(&challenge)
                .map_err(|_| PkceError::InvalidChallengeFormat)?,
            PkceChallengeMethod::S256 => {
                // SHA-256 output is 32 bytes, 43 characters unpadded.
                let decoded = URL_SAFE_NO_PAD
                    .decode(&challenge)
                    .map_err(|_| PkceError::InvalidChallengeFormat)?;
                if decoded.len() != 32 {
                    return Err(PkceError::InvalidChallengeFormat);
                }
            }
        }
        Ok(Self { challenge, method })
    }

    /// Verify that a verifier matches this challenge.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::VerificationFailed` if the verifier doesn't match.
    pub fn verify(&self, verifier: &PkceVerifier) -> Result<(), PkceError> {
        let expected = transform(verifier.as_str(), self.method);
        if bool::from(self.challenge.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// The challenge method.
    #[must_use]
    pub fn method(&self) -> PkceChallengeMethod {
        self.method
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.challenge
    }
}

fn transform(verifier: &str, method: PkceChallengeMethod) -> String {
    match method {
        PkceChallengeMethod::Plain => verifier.to_string(),
        PkceChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
    }
}

// =============================================================================
// Tests
// =============================================================================
