//! Client authentication for the token, introspection and revocation
//! endpoints.
//!
//! Credentials are examined in priority order:
//! 1. HTTP Basic Auth header (`client_secret_basic`)
//! 2. `client_id` + `client_secret` body parameters (`client_secret_post`)
//! 3. `client_assertion` JWT (`private_key_jwt`)
//! 4. `client_id` alone (`none`, public clients)
//!
//! The method actually used must be the one the client registered.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::AuthResult;
use crate::clients::{Client, ClientRegistry, ClientSecret, TokenEndpointAuthMethod};
use crate::error::AuthError;

/// `client_assertion_type` for JWT bearer assertions (RFC 7523).
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Client credentials carried in a form body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientCredentials {
    /// Client identifier.
    pub client_id: Option<String>,
    /// Client secret (`client_secret_post`).
    pub client_secret: Option<String>,
    /// Assertion type (`private_key_jwt`).
    pub client_assertion_type: Option<String>,
    /// Signed assertion (`private_key_jwt`).
    pub client_assertion: Option<String>,
}

/// A client that passed authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// The client.
    pub client: Arc<Client>,
    /// Method used.
    pub auth_method: TokenEndpointAuthMethod,
}

#[derive(Debug, Deserialize)]
struct AssertionClaims {
    iss: String,
    sub: String,
    #[serde(default)]
    jti: Option<String>,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

/// Authenticates OAuth clients.
///
/// Remembers the `jti` of accepted assertions until they expire so an
/// assertion cannot be replayed.
pub struct ClientAuthenticator {
    registry: Arc<dyn ClientRegistry>,
    seen_assertions: DashMap<String, i64>,
}

impl ClientAuthenticator {
    /// Creates an authenticator over a registry.
    #[must_use]
    pub fn new(registry: Arc<dyn ClientRegistry>) -> Self {
        Self {
            registry,
            seen_assertions: DashMap::new(),
        }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn ClientRegistry> {
        &self.registry
    }

    /// Authenticates the caller.
    ///
    /// `audience` is the URL of the endpoint being called; assertions must be
    /// addressed to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` (or `NotFound`, reported identically) when no
    /// acceptable credential is presented.
    pub async fn authenticate(
        &self,
        credentials: &ClientCredentials,
        basic_auth: Option<(String, String)>,
        audience: &str,
    ) -> AuthResult<AuthenticatedClient> {
        if let Some((client_id, secret)) = basic_auth {
            if let Some(ref body_id) = credentials.client_id {
                if *body_id != client_id {
                    return Err(AuthError::invalid_request(
                        "client_id in body does not match Authorization header",
                    ));
                }
            }
            return self
                .authenticate_secret(&client_id, &secret, TokenEndpointAuthMethod::ClientSecretBasic)
                .await;
        }

        if let (Some(client_id), Some(secret)) = (&credentials.client_id, &credentials.client_secret) {
            return self
                .authenticate_secret(client_id, secret, TokenEndpointAuthMethod::ClientSecretPost)
                .await;
        }

        if let Some(ref assertion_type) = credentials.client_assertion_type {
            if assertion_type != JWT_BEARER_ASSERTION_TYPE {
                return Err(AuthError::invalid_request(format!(
                    "Unsupported client_assertion_type: {assertion_type}"
                )));
            }
            let assertion = credentials
                .client_assertion
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("Missing client_assertion"))?;
            return self
                .authenticate_assertion(credentials.client_id.as_deref(), assertion, audience)
                .await;
        }

        if let Some(ref client_id) = credentials.client_id {
            return self.authenticate_public(client_id).await;
        }

        Err(AuthError::invalid_client("No client credentials provided"))
    }

    async fn authenticate_secret(
        &self,
        client_id: &str,
        secret: &str,
        method: TokenEndpointAuthMethod,
    ) -> AuthResult<AuthenticatedClient> {
        let client = self.registry.authenticate(client_id, secret).await?;
        require_method(&client, method)?;
        Ok(AuthenticatedClient {
            client,
            auth_method: method,
        })
    }

    async fn authenticate_public(&self, client_id: &str) -> AuthResult<AuthenticatedClient> {
        let client = self.registry.lookup(client_id).await?;
        if !client.public {
            return Err(AuthError::invalid_client(
                "Confidential clients must authenticate",
            ));
        }
        require_method(&client, TokenEndpointAuthMethod::None)?;
        Ok(AuthenticatedClient {
            client,
            auth_method: TokenEndpointAuthMethod::None,
        })
    }

    async fn authenticate_assertion(
        &self,
        client_id: Option<&str>,
        assertion: &str,
        audience: &str,
    ) -> AuthResult<AuthenticatedClient> {
        let client_id = match client_id {
            Some(id) => id.to_string(),
            None => unverified_issuer(assertion)?,
        };

        let client = match self.registry.lookup(&client_id).await {
            Ok(client) => client,
            Err(e) => {
                ClientSecret::dummy_verify(assertion);
                return Err(e.into());
            }
        };
        require_method(&client, TokenEndpointAuthMethod::PrivateKeyJwt)?;

        let keys = client
            .public_keys
            .as_ref()
            .ok_or_else(|| AuthError::invalid_client("Client has no registered public keys"))?;

        let header = decode_header(assertion)
            .map_err(|e| AuthError::invalid_client(format!("Malformed client assertion: {e}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::invalid_client("Client assertion must be signed with RS256"));
        }

        let jwk = match header.kid.as_deref() {
            Some(kid) => keys.find(kid),
            None if keys.keys.len() == 1 => keys.keys.first(),
            None => None,
        }
        .ok_or_else(|| AuthError::invalid_client("No matching client key"))?;

        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| AuthError::invalid_client(format!("Invalid client key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);

        let claims = decode::<AssertionClaims>(assertion, &key, &validation)
            .map_err(|e| AuthError::invalid_client(format!("Client assertion rejected: {e}")))?
            .claims;

        if claims.sub != client_id || claims.iss != client_id {
            return Err(AuthError::invalid_client(
                "Client assertion iss and sub must equal client_id",
            ));
        }

        self.record_assertion(&client_id, claims.jti.as_deref(), claims.exp)?;

        debug!(client_id = %client.id, "Client authenticated with private_key_jwt");
        Ok(AuthenticatedClient {
            client,
            auth_method: TokenEndpointAuthMethod::PrivateKeyJwt,
        })
    }

    fn record_assertion(&self, client_id: &str, jti: Option<&str>, exp: i64) -> AuthResult<()> {
        let jti = jti.ok_or_else(|| AuthError::invalid_client("Client assertion has no jti"))?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.seen_assertions.retain(|_, expiry| *expiry > now);

        let key = format!("{client_id}:{jti}");
        match self.seen_assertions.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AuthError::invalid_client(
                "Client assertion jti already used",
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(exp);
                Ok(())
            }
        }
    }
}

fn require_method(client: &Client, used: TokenEndpointAuthMethod) -> AuthResult<()> {
    match client.auth_method {
        Some(required) if required == used => Ok(()),
        Some(required) => Err(AuthError::invalid_client(format!(
            "Client must authenticate with {required}"
        ))),
        None if !client.public
            && matches!(
                used,
                TokenEndpointAuthMethod::ClientSecretBasic | TokenEndpointAuthMethod::ClientSecretPost
            ) =>
        {
            Ok(())
        }
        None => Err(AuthError::invalid_client(
            "Client must authenticate with a client secret",
        )),
    }
}

fn unverified_issuer(assertion: &str) -> AuthResult<String> {
    let payload = assertion
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::invalid_client("Malformed client assertion"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::invalid_client("Malformed client assertion"))?;
    let claims: UnverifiedIssuer = serde_json::from_slice(&bytes)
        .map_err(|_| AuthError::invalid_client("Malformed client assertion"))?;
    claims
        .iss
        .ok_or_else(|| AuthError::invalid_client("Client assertion has no issuer"))
}

/// Parses an HTTP Basic `Authorization` header value.
///
/// Client identifiers and secrets are form-urlencoded before being joined
/// (RFC 6749 Section 2.3.1), so both halves are decoded.
#[must_use]
pub fn parse_basic_auth(header: &str) -> Option<(String, String)> {
    let encoded = header
        .strip_prefix("Basic ")
        .or_else(|| header.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;

    let id = form_decode(id);
    let secret = form_decode(secret);
    if id.is_empty() {
        return None;
    }
    Some((id, secret))
}

fn form_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}
