//! JSON Web Key Set types.

use serde::{Deserialize, Serialize};

/// JSON Web Key Set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Creates a new empty JWKS.
    #[must_use]
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Adds a key to the set.
    pub fn add_key(&mut self, key: Jwk) {
        self.keys.push(key);
    }

    /// Finds a key by its identifier.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

impl Default for Jwks {
    fn default() -> Self {
        Self::new()
    }
}

/// Public RSA JSON Web Key.
///
/// Only public components are representable; there is no field that could
/// carry private key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always "RSA".
    pub kty: String,

    /// Key ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Key use ("sig" for signing).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// Algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url encoded).
    pub n: String,

    /// RSA exponent (base64url encoded).
    pub e: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_serializes_use_field() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            kid: Some("k1".to_string()),
            use_: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
            n: "AQAB".to_string(),
            e: "AQAB".to_string(),
        };

        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["use"], "sig");
        assert!(json.get("use_").is_none());
        assert!(json.get("d").is_none());
    }

    #[test]
    fn test_find_by_kid() {
        let jwks: Jwks = serde_json::from_value(serde_json::json!({
            "keys": [
                {"kty": "RSA", "kid": "a", "n": "AQAB", "e": "AQAB"},
                {"kty": "RSA", "kid": "b", "n": "AQAB", "e": "AQAB"}
            ]
        }))
        .unwrap();

        assert!(jwks.find("b").is_some());
        assert!(jwks.find("c").is_none());
    }
}
