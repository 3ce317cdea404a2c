//! Client lookup and secret authentication.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::model::Client;
use super::secret::ClientSecret;

/// Failures when resolving or authenticating a client.
///
/// The two kinds are kept apart for logging; both are reported to callers as
/// `invalid_client`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No client with this identifier is registered.
    #[error("Client not found: {client_id}")]
    NotFound {
        /// The unknown identifier.
        client_id: String,
    },

    /// The client exists but failed authentication.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of the failure.
        message: String,
    },
}

impl RegistryError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(client_id: impl Into<String>) -> Self {
        Self::NotFound {
            client_id: client_id.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }
}

/// Resolves client identifiers to client metadata.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Looks up a client by identifier.
    async fn lookup(&self, client_id: &str) -> Result<Arc<Client>, RegistryError>;

    /// Looks up a confidential client and verifies its secret.
    ///
    /// Unknown clients still pay for a secret comparison so timing does not
    /// reveal which identifiers exist.
    async fn authenticate(
        &self,
        client_id: &str,
        secret: &str,
    ) -> Result<Arc<Client>, RegistryError> {
        let client = match self.lookup(client_id).await {
            Ok(client) => client,
            Err(e) => {
                ClientSecret::dummy_verify(secret);
                return Err(e);
            }
        };

        match &client.secret {
            Some(stored) if stored.verify(secret) => Ok(client),
            Some(_) => Err(RegistryError::invalid_client("client secret mismatch")),
            None => {
                ClientSecret::dummy_verify(secret);
                Err(RegistryError::invalid_client("client has no secret"))
            }
        }
    }
}

/// Registry backed by the client list loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticClientRegistry {
    clients: HashMap<String, Arc<Client>>,
}

impl StaticClientRegistry {
    /// Builds a registry from a client list.
    ///
    /// # Errors
    /// Returns the offending identifier if two clients share an ID.
    pub fn new(clients: Vec<Client>) -> Result<Self, String> {
        let mut map = HashMap::with_capacity(clients.len());
        for client in clients {
            let id = client.id.clone();
            if map.insert(id.clone(), Arc::new(client)).is_some() {
                return Err(id);
            }
        }
        Ok(Self { clients: map })
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl ClientRegistry for StaticClientRegistry {
    async fn lookup(&self, client_id: &str) -> Result<Arc<Client>, RegistryError> {
        self.clients
            .get(client_id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(client_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::model::fixtures::{confidential_client, public_client};

    fn registry() -> StaticClientRegistry {
        StaticClientRegistry::new(vec![confidential_client(), public_client()]).unwrap()
    }

    #[tokio::test]
    async fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.lookup("app1").await.unwrap().id, "app1");
        assert!(matches!(
            registry.lookup("ghost").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_authenticate_with_secret() {
        let registry = registry();
        assert!(registry.authenticate("app1", "app1-secret").await.is_ok());
        assert!(matches!(
            registry.authenticate("app1", "wrong").await,
            Err(RegistryError::InvalidClient { .. })
        ));
    }

    #[tokio::test]
    async fn test_public_client_cannot_authenticate_with_secret() {
        let registry = registry();
        assert!(matches!(
            registry.authenticate("spa", "anything").await,
            Err(RegistryError::InvalidClient { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_client_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.authenticate("ghost", "x").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = StaticClientRegistry::new(vec![confidential_client(), confidential_client()])
            .unwrap_err();
        assert_eq!(err, "app1");
    }
}
