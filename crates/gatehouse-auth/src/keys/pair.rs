//! RSA signing key pairs.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::error::JwtError;
use super::jwks::Jwk;

/// Default RSA modulus size for generated keys.
pub const DEFAULT_RSA_BITS: usize = 2048;

/// An immutable RS256 signing key pair.
///
/// Rotation never mutates a key; the key manager moves keys between its
/// active slot and its retired list instead.
#[derive(Clone)]
pub struct SigningKey {
    /// Key ID (`kid` header of every token signed with this key).
    pub kid: String,

    /// When the key was created.
    pub created_at: OffsetDateTime,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    n: Vec<u8>,
    e: Vec<u8>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Algorithm used by every gatehouse signing key.
    pub const ALGORITHM: Algorithm = Algorithm::RS256;

    /// JOSE name of [`Self::ALGORITHM`].
    pub const ALGORITHM_NAME: &'static str = "RS256";

    /// Generates a new 2048-bit RSA key pair with a random key ID.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate() -> Result<Self, JwtError> {
        Self::generate_with_bits(DEFAULT_RSA_BITS)
    }

    /// Generates a new RSA key pair with the given modulus size.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate_with_bits(bits: usize) -> Result<Self, JwtError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| JwtError::key_generation(e.to_string()))?;

        Self::from_private_key(uuid::Uuid::new_v4().to_string(), &private_key)
            .map_err(|e| JwtError::key_generation(e.to_string()))
    }

    /// Loads a key pair from a PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    ///
    /// # Errors
    /// Returns an error if the PEM data is not a valid RSA private key.
    pub fn from_pem(kid: impl Into<String>, private_pem: &str) -> Result<Self, JwtError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Self::from_private_key(kid.into(), &private_key)
    }

    /// Loads a PEM key whose `kid` is its RFC 7638 JWK thumbprint.
    ///
    /// The same key always gets the same `kid`, so tokens survive a restart.
    ///
    /// # Errors
    /// Returns an error if the PEM data is not a valid RSA private key.
    pub fn from_pem_thumbprint(private_pem: &str) -> Result<Self, JwtError> {
        let mut key = Self::from_pem(String::new(), private_pem)?;
        key.kid = key.thumbprint();
        Ok(key)
    }

    /// RFC 7638 thumbprint of the public key, base64url encoded.
    #[must_use]
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            URL_SAFE_NO_PAD.encode(&self.e),
            URL_SAFE_NO_PAD.encode(&self.n)
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    fn from_private_key(kid: String, private_key: &RsaPrivateKey) -> Result<Self, JwtError> {
        let public_key = private_key.to_public_key();
        let n = public_key.n().to_bytes_be();
        let e = public_key.e().to_bytes_be();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let decoding_key =
            DecodingKey::from_rsa_components(&URL_SAFE_NO_PAD.encode(&n), &URL_SAFE_NO_PAD.encode(&e))
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid,
            created_at: OffsetDateTime::now_utc(),
            encoding_key,
            decoding_key,
            n,
            e,
        })
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the public half as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: Some(self.kid.clone()),
            use_: Some("sig".to_string()),
            alg: Some(Self::ALGORITHM_NAME.to_string()),
            n: URL_SAFE_NO_PAD.encode(&self.n),
            e: URL_SAFE_NO_PAD.encode(&self.e),
        }
    }
}
