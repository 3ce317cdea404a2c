//! Signing key lifecycle.
//!
//! The [`KeyManager`] owns one active key and an ordered list of retired
//! keys. Reads take a lock-free snapshot of the current [`KeyRing`];
//! rotation builds a new ring and swaps it in atomically, so a request that
//! is signing or verifying never observes a half-rotated state.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use jsonwebtoken::{Header, TokenData, Validation, decode, decode_header, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::JwtError;
use super::jwks::Jwks;
use super::pair::SigningKey;

/// Status of a key within the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Used for signing new tokens.
    Active,
    /// Kept for verification of tokens signed before rotation.
    Retired,
}

/// A key that was replaced by a rotation.
#[derive(Debug, Clone)]
pub struct RetiredKey {
    /// The key material.
    pub key: Arc<SigningKey>,
    /// When the key stopped being active.
    pub retired_at: OffsetDateTime,
}

/// Immutable snapshot of all known keys.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active: Arc<SigningKey>,
    retired: Vec<RetiredKey>,
}

impl KeyRing {
    fn new(active: Arc<SigningKey>) -> Self {
        Self {
            active,
            retired: Vec::new(),
        }
    }

    fn rotated(&self, next: Arc<SigningKey>, now: OffsetDateTime) -> Self {
        let mut retired = Vec::with_capacity(self.retired.len() + 1);
        retired.push(RetiredKey {
            key: Arc::clone(&self.active),
            retired_at: now,
        });
        retired.extend(self.retired.iter().cloned());

        Self {
            active: next,
            retired,
        }
    }

    /// The active key.
    #[must_use]
    pub fn active(&self) -> &Arc<SigningKey> {
        &self.active
    }

    /// Retired keys, most recently retired first.
    #[must_use]
    pub fn retired(&self) -> &[RetiredKey] {
        &self.retired
    }

    /// Looks up a key by ID together with its status.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<(&Arc<SigningKey>, KeyStatus)> {
        if self.active.kid == kid {
            return Some((&self.active, KeyStatus::Active));
        }
        self.retired
            .iter()
            .find(|r| r.key.kid == kid)
            .map(|r| (&r.key, KeyStatus::Retired))
    }
}

/// Owns the signing keys and the atomic active-key pointer.
///
/// Constructed once at startup and shared through an `Arc`.
pub struct KeyManager {
    ring: ArcSwap<KeyRing>,
}

impl KeyManager {
    /// Creates a manager whose active key is `initial`.
    #[must_use]
    pub fn new(initial: SigningKey) -> Self {
        Self {
            ring: ArcSwap::from_pointee(KeyRing::new(Arc::new(initial))),
        }
    }

    /// Creates a manager with a freshly generated key.
    ///
    /// # Errors
    /// Key generation failure at startup is fatal, so the error is returned
    /// to the caller rather than logged.
    pub fn generate() -> Result<Self, JwtError> {
        let key = SigningKey::generate()?;
        info!(kid = %key.kid, "Generated initial signing key");
        Ok(Self::new(key))
    }

    /// Returns the current snapshot of all keys.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeyRing> {
        self.ring.load_full()
    }

    /// Returns the active signing key.
    #[must_use]
    pub fn active_key(&self) -> Arc<SigningKey> {
        Arc::clone(self.ring.load().active())
    }

    /// Returns the public key set: the active key followed by retired keys.
    #[must_use]
    pub fn public_key_set(&self) -> Jwks {
        let ring = self.ring.load();
        let mut jwks = Jwks::new();
        jwks.add_key(ring.active().to_jwk());
        for retired in ring.retired() {
            jwks.add_key(retired.key.to_jwk());
        }
        jwks
    }

    /// Generates a new key and makes it active.
    ///
    /// On failure the previous key stays active and the error is logged.
    ///
    /// # Errors
    /// Returns the generation error so callers can report it.
    pub fn rotate(&self) -> Result<String, JwtError> {
        match SigningKey::generate() {
            Ok(key) => Ok(self.rotate_to(key)),
            Err(e) => {
                warn!(error = %e, "Signing key rotation failed, keeping current key");
                Err(e)
            }
        }
    }

    /// Makes `key` the active key and retires the previous one.
    pub fn rotate_to(&self, key: SigningKey) -> String {
        let kid = key.kid.clone();
        let next = Arc::new(key);
        let now = OffsetDateTime::now_utc();

        let previous = self.ring.rcu(|ring| ring.rotated(Arc::clone(&next), now));

        info!(
            kid = %kid,
            retired_kid = %previous.active().kid,
            "Rotated signing key"
        );
        kid
    }

    /// Removes retired keys that were retired longer than `older_than` ago.
    ///
    /// Returns the number of keys removed.
    pub fn purge(&self, older_than: Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc() - older_than;
        let mut removed = 0;

        self.ring.rcu(|ring| {
            let retired: Vec<RetiredKey> = ring
                .retired()
                .iter()
                .filter(|r| r.retired_at > cutoff)
                .cloned()
                .collect();
            removed = ring.retired().len() - retired.len();
            KeyRing {
                active: Arc::clone(ring.active()),
                retired,
            }
        });

        if removed > 0 {
            debug!(removed, "Purged retired signing keys");
        }
        removed
    }

    /// Signs `claims` with the active key, setting the `kid` header.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let key = self.active_key();
        let mut header = Header::new(SigningKey::ALGORITHM);
        header.kid = Some(key.kid.clone());

        encode(&header, claims, key.encoding_key())
            .map_err(|e| JwtError::sign(e.to_string()))
    }

    /// Verifies a token against the key named by its `kid` header.
    ///
    /// Tokens signed by retired keys remain verifiable until the key is
    /// purged. Issuer and audience are checked by the caller.
    ///
    /// # Errors
    /// Returns an error if the key is unknown, the signature is invalid or
    /// the token has expired.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| JwtError::malformed("token has no kid header"))?;

        let ring = self.ring.load();
        let (key, _) = ring.find(&kid).ok_or_else(|| JwtError::unknown_kid(&kid))?;

        let mut validation = Validation::new(SigningKey::ALGORITHM);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        decode(token, key.decoding_key(), &validation).map_err(JwtError::from)
    }

    /// Spawns the periodic rotation timer.
    ///
    /// Key generation runs on the blocking pool so request workers are never
    /// stalled. Retired keys older than `retired_lifespan` are purged after
    /// each rotation.
    pub fn spawn_rotation(
        self: Arc<Self>,
        interval: Duration,
        retired_lifespan: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let manager = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || manager.rotate()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(_)) => continue,
                    Err(e) => {
                        warn!(error = %e, "Signing key rotation task panicked");
                        continue;
                    }
                }

                self.purge(retired_lifespan);
            }
        })
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.load();
        f.debug_struct("KeyManager")
            .field("active", &ring.active().kid)
            .field("retired", &ring.retired().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct TestClaims {
        sub: String,
        iat: i64,
        exp: i64,
    }

    fn claims(exp_offset: i64) -> TestClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        TestClaims {
            sub: "john".to_string(),
            iat: now,
            exp: now + exp_offset,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let manager = KeyManager::generate().unwrap();
        let token = manager.sign(&claims(300)).unwrap();

        let data = manager.verify::<TestClaims>(&token).unwrap();
        assert_eq!(data.claims.sub, "john");
        assert_eq!(data.header.kid.as_deref(), Some(manager.active_key().kid.as_str()));
    }

    #[test]
    fn test_rotation_keeps_old_tokens_valid() {
        let manager = KeyManager::generate().unwrap();
        let old_kid = manager.active_key().kid.clone();
        let token = manager.sign(&claims(300)).unwrap();

        let new_kid = manager.rotate().unwrap();
        assert_ne!(old_kid, new_kid);
        assert_eq!(manager.active_key().kid, new_kid);

        // Signed before rotation, still verifies.
        assert!(manager.verify::<TestClaims>(&token).is_ok());

        let jwks = manager.public_key_set();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid.as_deref(), Some(new_kid.as_str()));
        assert_eq!(jwks.keys[1].kid.as_deref(), Some(old_kid.as_str()));
    }

    #[test]
    fn test_purge_removes_retired_keys() {
        let manager = KeyManager::generate().unwrap();
        let token = manager.sign(&claims(300)).unwrap();
        manager.rotate().unwrap();

        // Nothing retired long enough yet.
        assert_eq!(manager.purge(Duration::from_secs(3600)), 0);
        assert_eq!(manager.public_key_set().keys.len(), 2);

        assert_eq!(manager.purge(Duration::ZERO), 1);
        assert_eq!(manager.public_key_set().keys.len(), 1);

        let err = manager.verify::<TestClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::UnknownKid { .. }));
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = KeyManager::generate().unwrap();
        let token = manager.sign(&claims(-3600)).unwrap();

        let err = manager.verify::<TestClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::Expired));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let ours = KeyManager::generate().unwrap();
        let theirs = KeyManager::new(SigningKey::generate().unwrap());

        let token = theirs.sign(&claims(300)).unwrap();
        let err = ours.verify::<TestClaims>(&token).unwrap_err();
        assert!(matches!(err, JwtError::UnknownKid { .. }));
    }

    #[test]
    fn test_public_key_set_is_stable_without_rotation() {
        let manager = KeyManager::generate().unwrap();
        let a = serde_json::to_vec(&manager.public_key_set()).unwrap();
        let b = serde_json::to_vec(&manager.public_key_set()).unwrap();
        assert_eq!(a, b);
    }
}
