//! Primary store with a fallback.
//!
//! Writes go to the primary; when it is unavailable they land in the
//! fallback instead. Reads consult the primary first and fall through to the
//! fallback when the primary does not know the token or cannot answer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{GrantRecord, GrantStore, StoreError};

/// Composes two grant stores.
#[derive(Clone)]
pub struct LayeredGrantStore {
    primary: Arc<dyn GrantStore>,
    fallback: Arc<dyn GrantStore>,
}

impl LayeredGrantStore {
    /// Creates a layered store.
    #[must_use]
    pub fn new(primary: Arc<dyn GrantStore>, fallback: Arc<dyn GrantStore>) -> Self {
        Self { primary, fallback }
    }
}

/// Combines a primary failure with the fallback's answer.
///
/// A fallback `NotFound` after a primary outage is not trustworthy, so the
/// outage is reported instead.
fn resolve<T>(
    primary: StoreError,
    fallback: Result<T, StoreError>,
) -> Result<T, StoreError> {
    match fallback {
        Ok(value) => Ok(value),
        Err(StoreError::NotFound) if primary.is_unavailable() => Err(primary),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl GrantStore for LayeredGrantStore {
    async fn issue_authorization_code(&self, record: GrantRecord) -> Result<String, StoreError> {
        match self.primary.issue_authorization_code(record.clone()).await {
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, "Primary grant store unavailable, issuing code in fallback");
                self.fallback.issue_authorization_code(record).await
            }
            other => other,
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<GrantRecord, StoreError> {
        match self.primary.exchange_code(code).await {
            Err(e) if e.is_unavailable() || matches!(e, StoreError::NotFound) => {
                resolve(e, self.fallback.exchange_code(code).await)
            }
            other => other,
        }
    }

    async fn issue_access_token(
        &self,
        token: &str,
        record: GrantRecord,
    ) -> Result<(), StoreError> {
        match self.primary.issue_access_token(token, record.clone()).await {
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, "Primary grant store unavailable, recording token in fallback");
                self.fallback.issue_access_token(token, record).await
            }
            other => other,
        }
    }

    async fn issue_refresh_token(&self, record: GrantRecord) -> Result<String, StoreError> {
        match self.primary.issue_refresh_token(record.clone()).await {
            Err(e) if e.is_unavailable() => {
                warn!(error = %e, "Primary grant store unavailable, issuing refresh token in fallback");
                self.fallback.issue_refresh_token(record).await
            }
            other => other,
        }
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<GrantRecord, StoreError> {
        match self.primary.consume_refresh_token(token).await {
            Err(e) if e.is_unavailable() || matches!(e, StoreError::NotFound) => {
                resolve(e, self.fallback.consume_refresh_token(token).await)
            }
            other => other,
        }
    }

    async fn find(&self, token: &str) -> Result<GrantRecord, StoreError> {
        match self.primary.find(token).await {
            Err(e) if e.is_unavailable() || matches!(e, StoreError::NotFound) => {
                resolve(e, self.fallback.find(token).await)
            }
            other => other,
        }
    }

    async fn revoke(&self, token: &str) -> Result<GrantRecord, StoreError> {
        match self.primary.revoke(token).await {
            Err(e) if e.is_unavailable() || matches!(e, StoreError::NotFound) => {
                resolve(e, self.fallback.revoke(token).await)
            }
            other => other,
        }
    }

    async fn revoke_grant(&self, grant_id: &str) -> Result<usize, StoreError> {
        let primary = self.primary.revoke_grant(grant_id).await;
        let fallback = self.fallback.revoke_grant(grant_id).await?;
        match primary {
            Ok(count) => Ok(count + fallback),
            Err(e) => {
                warn!(error = %e, grant_id, "Primary grant store failed to revoke grant");
                Err(e)
            }
        }
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let fallback = self.fallback.purge_expired().await?;
        let primary = self.primary.purge_expired().await?;
        Ok(primary + fallback)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use time::Duration;

    use super::*;
    use crate::store::{MemoryGrantStore, TokenKind};

    /// A store that fails every call as unavailable.
    #[derive(Default)]
    pub(crate) struct DownStore {
        pub(crate) calls: AtomicUsize,
    }

    impl DownStore {
        fn fail<T>(&self) -> Result<T, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::backend("connection refused"))
        }
    }

    #[async_trait]
    impl GrantStore for DownStore {
        async fn issue_authorization_code(&self, _: GrantRecord) -> Result<String, StoreError> {
            self.fail()
        }
        async fn exchange_code(&self, _: &str) -> Result<GrantRecord, StoreError> {
            self.fail()
        }
        async fn issue_access_token(&self, _: &str, _: GrantRecord) -> Result<(), StoreError> {
            self.fail()
        }
        async fn issue_refresh_token(&self, _: GrantRecord) -> Result<String, StoreError> {
            self.fail()
        }
        async fn consume_refresh_token(&self, _: &str) -> Result<GrantRecord, StoreError> {
            self.fail()
        }
        async fn find(&self, _: &str) -> Result<GrantRecord, StoreError> {
            self.fail()
        }
        async fn revoke(&self, _: &str) -> Result<GrantRecord, StoreError> {
            self.fail()
        }
        async fn revoke_grant(&self, _: &str) -> Result<usize, StoreError> {
            self.fail()
        }
        async fn purge_expired(&self) -> Result<usize, StoreError> {
            self.fail()
        }
    }

    fn record() -> GrantRecord {
        GrantRecord::new(TokenKind::AuthorizationCode, "g", "app1", Duration::minutes(1))
    }

    #[tokio::test]
    async fn test_writes_fall_back_when_primary_down() {
        let fallback = Arc::new(MemoryGrantStore::new());
        let store = LayeredGrantStore::new(Arc::new(DownStore::default()), fallback.clone());

        let code = store.issue_authorization_code(record()).await.unwrap();
        assert_eq!(fallback.len(), 1);
        assert!(store.exchange_code(&code).await.is_ok());
    }

    #[tokio::test]
    async fn test_reads_consult_both_layers() {
        let primary = Arc::new(MemoryGrantStore::new());
        let fallback = Arc::new(MemoryGrantStore::new());
        let store = LayeredGrantStore::new(primary.clone(), fallback.clone());

        let in_primary = primary.issue_authorization_code(record()).await.unwrap();
        let in_fallback = fallback.issue_authorization_code(record()).await.unwrap();

        assert!(store.exchange_code(&in_primary).await.is_ok());
        assert!(store.exchange_code(&in_fallback).await.is_ok());
        assert!(matches!(
            store.exchange_code(&in_fallback).await,
            Err(StoreError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_outage_not_masked_as_not_found() {
        let store = LayeredGrantStore::new(
            Arc::new(DownStore::default()),
            Arc::new(MemoryGrantStore::new()),
        );

        let err = store.exchange_code("unknown").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_revoke_grant_spans_layers() {
        let primary = Arc::new(MemoryGrantStore::new());
        let fallback = Arc::new(MemoryGrantStore::new());
        let store = LayeredGrantStore::new(primary.clone(), fallback.clone());

        let access = GrantRecord::new(TokenKind::AccessToken, "g", "app1", Duration::hours(1));
        primary.issue_access_token("a", access.clone()).await.unwrap();
        fallback.issue_access_token("b", access).await.unwrap();

        assert_eq!(store.revoke_grant("g").await.unwrap(), 2);
    }
}
