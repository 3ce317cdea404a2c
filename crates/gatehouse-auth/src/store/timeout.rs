//! Deadline-bounded store access.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{GrantRecord, GrantStore, Introspection, StoreError};

/// Default per-call deadline.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default pause before retrying an idempotent call.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Wraps a store so every call finishes within a deadline.
///
/// Idempotent calls (lookups and revocations) are retried once after a short
/// backoff when the first attempt times out or the backend fails. Single-use
/// redemptions and issuance are never retried.
#[derive(Clone)]
pub struct TimeoutGrantStore {
    inner: Arc<dyn GrantStore>,
    timeout: Duration,
    backoff: Duration,
}

impl TimeoutGrantStore {
    /// Wraps `inner` with the given per-call deadline.
    #[must_use]
    pub fn new(inner: Arc<dyn GrantStore>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Sets the retry backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::timeout(operation))?
    }

    async fn idempotent<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match self.bounded(operation, call()).await {
            Err(e) if e.is_unavailable() => {
                debug!(operation, error = %e, "Retrying idempotent store call");
                tokio::time::sleep(self.backoff).await;
                self.bounded(operation, call()).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl GrantStore for TimeoutGrantStore {
    async fn issue_authorization_code(&self, record: GrantRecord) -> Result<String, StoreError> {
        self.bounded(
            "issue_authorization_code",
            self.inner.issue_authorization_code(record),
        )
        .await
    }

    async fn exchange_code(&self, code: &str) -> Result<GrantRecord, StoreError> {
        self.bounded("exchange_code", self.inner.exchange_code(code))
            .await
    }

    async fn issue_access_token(
        &self,
        token: &str,
        record: GrantRecord,
    ) -> Result<(), StoreError> {
        self.bounded(
            "issue_access_token",
            self.inner.issue_access_token(token, record),
        )
        .await
    }

    async fn issue_refresh_token(&self, record: GrantRecord) -> Result<String, StoreError> {
        self.bounded(
            "issue_refresh_token",
            self.inner.issue_refresh_token(record),
        )
        .await
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<GrantRecord, StoreError> {
        self.bounded(
            "consume_refresh_token",
            self.inner.consume_refresh_token(token),
        )
        .await
    }

    async fn find(&self, token: &str) -> Result<GrantRecord, StoreError> {
        self.idempotent("find", || self.inner.find(token)).await
    }

    async fn revoke(&self, token: &str) -> Result<GrantRecord, StoreError> {
        self.idempotent("revoke", || self.inner.revoke(token)).await
    }

    async fn revoke_grant(&self, grant_id: &str) -> Result<usize, StoreError> {
        self.idempotent("revoke_grant", || self.inner.revoke_grant(grant_id))
            .await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.idempotent("purge_expired", || self.inner.purge_expired())
            .await
    }

    async fn introspect(&self, token: &str) -> Result<Introspection, StoreError> {
        self.idempotent("introspect", || self.inner.introspect(token))
            .await
    }
}
