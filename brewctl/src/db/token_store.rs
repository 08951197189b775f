//! Token store / revocation registry abstraction.
//!
//! The store is the authoritative override for remember-me tokens: codec
//! validation proves a cookie was minted by us, the store decides whether its
//! token id is still live. Implementations must make [`TokenStore::consume`]
//! atomic - concurrent rotation attempts on one token id elect exactly one
//! winner.
//!
//! Two implementations exist: [`PostgresTokenStore`] for durable deployments
//! (revocation state survives worker restarts) and [`MemoryTokenStore`] for
//! tests and single-node development.
//!
//! [`PostgresTokenStore`]: crate::db::handlers::remember_tokens::PostgresTokenStore

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::db::errors::Result;
use crate::db::models::remember_tokens::RememberTokenRecord;
use crate::types::SubjectId;

/// Outcome of an atomic consume (compare-and-revoke) operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This caller won: the token was live and is now revoked.
    Consumed { subject_id: SubjectId },
    /// The token exists but was already revoked (rotation race lost, or logout).
    AlreadyRevoked,
    /// No live token with this id (never existed, or expired).
    NotFound,
}

/// Durable key-value store for remember-token records with
/// compare-and-revoke semantics, keyed by token id.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a freshly issued token record.
    async fn put(&self, record: RememberTokenRecord) -> Result<()>;

    /// Fetch a record by token id. Expired and revoked records are still
    /// returned - callers decide how to treat them.
    async fn lookup(&self, token_id: Uuid) -> Result<Option<RememberTokenRecord>>;

    /// Atomically revoke a live token, returning its subject.
    ///
    /// At most one concurrent caller observes [`ConsumeOutcome::Consumed`]
    /// for a given token id; the rest observe `AlreadyRevoked` or `NotFound`.
    async fn consume(&self, token_id: Uuid) -> Result<ConsumeOutcome>;

    /// Revoke a token unconditionally. Returns whether a live row was revoked.
    async fn revoke(&self, token_id: Uuid) -> Result<bool>;

    /// Revoke every live token for a subject (logout-everywhere, password
    /// change). Returns the number of tokens revoked.
    async fn revoke_all_for_subject(&self, subject_id: SubjectId) -> Result<u64>;

    /// Delete records whose expiry has passed. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// In-memory token store for tests and single-node development.
///
/// DashMap shard locks make `consume` atomic per key.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    records: DashMap<Uuid, RememberTokenRecord>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn put(&self, record: RememberTokenRecord) -> Result<()> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn lookup(&self, token_id: Uuid) -> Result<Option<RememberTokenRecord>> {
        Ok(self.records.get(&token_id).map(|r| r.value().clone()))
    }

    async fn consume(&self, token_id: Uuid) -> Result<ConsumeOutcome> {
        // get_mut holds the shard lock for the whole check-and-set
        match self.records.get_mut(&token_id) {
            None => Ok(ConsumeOutcome::NotFound),
            Some(mut record) => {
                if record.revoked_at.is_some() {
                    Ok(ConsumeOutcome::AlreadyRevoked)
                } else if record.expires_at <= Utc::now() {
                    Ok(ConsumeOutcome::NotFound)
                } else {
                    record.revoked_at = Some(Utc::now());
                    Ok(ConsumeOutcome::Consumed {
                        subject_id: record.subject_id,
                    })
                }
            }
        }
    }

    async fn revoke(&self, token_id: Uuid) -> Result<bool> {
        match self.records.get_mut(&token_id) {
            None => Ok(false),
            Some(mut record) => {
                if record.revoked_at.is_some() {
                    Ok(false)
                } else {
                    record.revoked_at = Some(Utc::now());
                    Ok(true)
                }
            }
        }
    }

    async fn revoke_all_for_subject(&self, subject_id: SubjectId) -> Result<u64> {
        let mut revoked = 0;
        for mut entry in self.records.iter_mut() {
            if entry.subject_id == subject_id && entry.revoked_at.is_none() {
                entry.revoked_at = Some(Utc::now());
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let before = self.records.len();
        let now = Utc::now();
        self.records.retain(|_, record| record.expires_at > now);
        Ok((before - self.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;

    fn live_record(subject_id: SubjectId) -> RememberTokenRecord {
        RememberTokenRecord::new(Uuid::new_v4(), subject_id, Utc::now() + Duration::days(30))
    }

    #[tokio::test]
    async fn test_put_lookup_roundtrip() {
        let store = MemoryTokenStore::new();
        let record = live_record(Uuid::new_v4());

        store.put(record.clone()).await.unwrap();

        let found = store.lookup(record.id).await.unwrap().unwrap();
        assert_eq!(found.subject_id, record.subject_id);
        assert!(found.revoked_at.is_none());

        assert!(store.lookup(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = MemoryTokenStore::new();
        let record = live_record(Uuid::new_v4());
        store.put(record.clone()).await.unwrap();

        let outcome = store.consume(record.id).await.unwrap();
        assert_eq!(
            outcome,
            ConsumeOutcome::Consumed {
                subject_id: record.subject_id
            }
        );

        // Second consume loses
        let outcome = store.consume(record.id).await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::AlreadyRevoked);
    }

    #[tokio::test]
    async fn test_consume_unknown_and_expired() {
        let store = MemoryTokenStore::new();
        assert_eq!(
            store.consume(Uuid::new_v4()).await.unwrap(),
            ConsumeOutcome::NotFound
        );

        let expired =
            RememberTokenRecord::new(Uuid::new_v4(), Uuid::new_v4(), Utc::now() - Duration::hours(1));
        store.put(expired.clone()).await.unwrap();
        assert_eq!(
            store.consume(expired.id).await.unwrap(),
            ConsumeOutcome::NotFound
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_elects_one_winner() {
        let store = Arc::new(MemoryTokenStore::new());
        let record = live_record(Uuid::new_v4());
        store.put(record.clone()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let token_id = record.id;
            handles.push(tokio::spawn(
                async move { store.consume(token_id).await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ConsumeOutcome::Consumed { .. }) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent consume may win");
    }

    #[tokio::test]
    async fn test_revoke_all_for_subject() {
        let store = MemoryTokenStore::new();
        let subject = Uuid::new_v4();
        for _ in 0..3 {
            store.put(live_record(subject)).await.unwrap();
        }
        let other = live_record(Uuid::new_v4());
        store.put(other.clone()).await.unwrap();

        let revoked = store.revoke_all_for_subject(subject).await.unwrap();
        assert_eq!(revoked, 3);

        // Other subjects are untouched
        assert_eq!(
            store.consume(other.id).await.unwrap(),
            ConsumeOutcome::Consumed {
                subject_id: other.subject_id
            }
        );
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryTokenStore::new();
        store.put(live_record(Uuid::new_v4())).await.unwrap();
        store
            .put(RememberTokenRecord::new(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Utc::now() - Duration::minutes(1),
            ))
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }
}
