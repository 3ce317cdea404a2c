//! In-memory grant store.

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use super::{GrantRecord, GrantStore, StoreError, TokenKind, fingerprint, generate_token};

/// Grant store backed by a sharded concurrent map.
///
/// Single-use redemption holds the entry's shard lock across the
/// check-and-mark, which makes it a per-record compare-and-set.
#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    records: DashMap<String, GrantRecord>,
}

impl MemoryGrantStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn redeem(&self, token: &str, kind: TokenKind) -> Result<GrantRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(&fingerprint(token))
            .ok_or(StoreError::NotFound)?;

        if entry.kind != kind {
            return Err(StoreError::NotFound);
        }
        if entry.used_at.is_some() {
            return Err(StoreError::AlreadyUsed);
        }
        if entry.revoked {
            return Err(StoreError::Revoked);
        }
        if entry.is_expired() {
            return Err(StoreError::Expired);
        }

        entry.used_at = Some(OffsetDateTime::now_utc());
        Ok(entry.clone())
    }

    fn insert(&self, token: &str, record: GrantRecord) {
        self.records.insert(fingerprint(token), record);
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn issue_authorization_code(&self, record: GrantRecord) -> Result<String, StoreError> {
        let code = generate_token();
        self.insert(&code, record);
        Ok(code)
    }

    async fn exchange_code(&self, code: &str) -> Result<GrantRecord, StoreError> {
        self.redeem(code, TokenKind::AuthorizationCode)
    }

    async fn issue_access_token(
        &self,
        token: &str,
        record: GrantRecord,
    ) -> Result<(), StoreError> {
        self.insert(token, record);
        Ok(())
    }

    async fn issue_refresh_token(&self, record: GrantRecord) -> Result<String, StoreError> {
        let token = generate_token();
        self.insert(&token, record);
        Ok(token)
    }

    async fn consume_refresh_token(&self, token: &str) -> Result<GrantRecord, StoreError> {
        self.redeem(token, TokenKind::RefreshToken)
    }

    async fn find(&self, token: &str) -> Result<GrantRecord, StoreError> {
        self.records
            .get(&fingerprint(token))
            .map(|r| r.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn revoke(&self, token: &str) -> Result<GrantRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(&fingerprint(token))
            .ok_or(StoreError::NotFound)?;
        entry.revoked = true;
        Ok(entry.clone())
    }

    async fn revoke_grant(&self, grant_id: &str) -> Result<usize, StoreError> {
        let mut revoked = 0;
        for mut entry in self.records.iter_mut() {
            if entry.grant_id == grant_id && !entry.revoked {
                entry.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired());
        Ok(before.saturating_sub(self.records.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;

    fn code_record() -> GrantRecord {
        GrantRecord::new(TokenKind::AuthorizationCode, "grant-1", "app1", Duration::minutes(1))
            .with_subject("john")
            .with_redirect_uri("https://app1.example.com/cb")
    }

    #[tokio::test]
    async fn test_code_exchanged_exactly_once() {
        let store = MemoryGrantStore::new();
        let code = store.issue_authorization_code(code_record()).await.unwrap();

        let record = store.exchange_code(&code).await.unwrap();
        assert_eq!(record.subject.as_deref(), Some("john"));
        assert!(record.used_at.is_some());

        assert!(matches!(
            store.exchange_code(&code).await,
            Err(StoreError::AlreadyUsed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_exchange_has_single_winner() {
        let store = Arc::new(MemoryGrantStore::new());
        let code = store.issue_authorization_code(code_record()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            let code = code.clone();
            handles.push(tokio::spawn(async move { store.exchange_code(&code).await }));
        }

        let mut successes = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(StoreError::AlreadyUsed) => already_used += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(already_used, 31);
    }

    #[tokio::test]
    async fn test_expired_code_rejected() {
        let store = MemoryGrantStore::new();
        let record =
            GrantRecord::new(TokenKind::AuthorizationCode, "g", "app1", Duration::seconds(-1));
        let code = store.issue_authorization_code(record).await.unwrap();

        assert!(matches!(
            store.exchange_code(&code).await,
            Err(StoreError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let store = MemoryGrantStore::new();
        assert!(matches!(
            store.exchange_code("nope").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_a_code() {
        let store = MemoryGrantStore::new();
        let record = GrantRecord::new(TokenKind::RefreshToken, "g", "app1", Duration::hours(1));
        let token = store.issue_refresh_token(record).await.unwrap();

        assert!(matches!(
            store.exchange_code(&token).await,
            Err(StoreError::NotFound)
        ));
        assert!(store.consume_refresh_token(&token).await.is_ok());
        assert!(matches!(
            store.consume_refresh_token(&token).await,
            Err(StoreError::AlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn test_revoke_and_introspect() {
        let store = MemoryGrantStore::new();
        let record = GrantRecord::new(TokenKind::AccessToken, "g", "app1", Duration::hours(1));
        store.issue_access_token("jwt-value", record).await.unwrap();

        assert!(store.introspect("jwt-value").await.unwrap().active);

        store.revoke("jwt-value").await.unwrap();
        let result = store.introspect("jwt-value").await.unwrap();
        assert!(!result.active);
        assert!(result.record.is_none());
    }

    #[tokio::test]
    async fn test_revoke_grant_cascades() {
        let store = MemoryGrantStore::new();
        let access = GrantRecord::new(TokenKind::AccessToken, "g1", "app1", Duration::hours(1));
        let refresh = access.derive(TokenKind::RefreshToken, Duration::days(1));
        let other = GrantRecord::new(TokenKind::AccessToken, "g2", "app1", Duration::hours(1));

        store.issue_access_token("a1", access).await.unwrap();
        let refresh_token = store.issue_refresh_token(refresh).await.unwrap();
        store.issue_access_token("a2", other).await.unwrap();

        assert_eq!(store.revoke_grant("g1").await.unwrap(), 2);
        assert!(!store.introspect("a1").await.unwrap().active);
        assert!(!store.introspect(&refresh_token).await.unwrap().active);
        assert!(store.introspect("a2").await.unwrap().active);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryGrantStore::new();
        let live = GrantRecord::new(TokenKind::AccessToken, "g", "c", Duration::hours(1));
        let dead = GrantRecord::new(TokenKind::AccessToken, "g", "c", Duration::seconds(-5));
        store.issue_access_token("live", live).await.unwrap();
        store.issue_access_token("dead", dead).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}
