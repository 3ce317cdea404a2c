//! Signing and verification failures.

/// Errors raised while signing, verifying or loading signing keys.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// A token could not be signed.
    #[error("could not sign token: {reason}")]
    Sign {
        /// Underlying failure.
        reason: String,
    },

    /// A token is not a well-formed JWS.
    #[error("malformed token: {reason}")]
    Malformed {
        /// Underlying failure.
        reason: String,
    },

    /// `exp` has passed.
    #[error("token expired")]
    Expired,

    /// The signature does not verify under the key named by `kid`.
    #[error("signature does not verify")]
    BadSignature,

    /// `iss`, `aud`, `nbf` or a required claim is wrong.
    #[error("claim check failed: {reason}")]
    Claims {
        /// Offending claim.
        reason: String,
    },

    /// The header names a key that is neither active nor retired.
    #[error("no signing key with kid '{kid}'")]
    UnknownKid {
        /// Key identifier from the JWS header.
        kid: String,
    },

    /// The RNG or RSA generator failed.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Underlying failure.
        reason: String,
    },

    /// PEM or DER key material was rejected.
    #[error("invalid key material: {reason}")]
    InvalidKey {
        /// Underlying failure.
        reason: String,
    },
}

impl JwtError {
    #[must_use]
    pub fn sign(reason: impl Into<String>) -> Self {
        Self::Sign {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn claims(reason: impl Into<String>) -> Self {
        Self::Claims {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn unknown_kid(kid: impl Into<String>) -> Self {
        Self::UnknownKid { kid: kid.into() }
    }

    #[must_use]
    pub fn key_generation(reason: impl Into<String>) -> Self {
        Self::KeyGeneration {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// The presented token is bad; the provider itself is fine.
    #[must_use]
    pub fn rejects_token(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. }
                | Self::Expired
                | Self::BadSignature
                | Self::Claims { .. }
                | Self::UnknownKid { .. }
        )
    }

    /// Local key material is unusable.
    #[must_use]
    pub fn is_key_fault(&self) -> bool {
        matches!(self, Self::KeyGeneration { .. } | Self::InvalidKey { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                Self::invalid_key(err.to_string())
            }
            _ => Self::malformed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classes() {
        assert!(JwtError::Expired.rejects_token());
        assert!(JwtError::BadSignature.rejects_token());
        assert!(JwtError::unknown_kid("k1").rejects_token());
        assert!(!JwtError::unknown_kid("k1").is_key_fault());
        assert!(JwtError::key_generation("rng").is_key_fault());
        assert!(!JwtError::sign("oops").rejects_token());
    }
}
