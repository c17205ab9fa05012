//! Idempotency guard backed by a shared store
//!
//! Consumers are horizontally scaled, so the guard must be atomic across
//! processes, not a process-local set. The Postgres implementation relies
//! on `INSERT ... ON CONFLICT DO NOTHING` as its compare-and-set; the
//! in-memory implementation exists for tests and single-process dev runs.
//!
//! `mark_if_absent` is a *claim*: the winner takes it before applying the
//! side effect, and releases it again if the side effect fails
//! transiently, so broker redelivery can try again. A record that
//! survives is write-once.

use crate::StoreError;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Mutex;
use uuid::Uuid;

/// Atomic check-and-mark store for processed event ids
///
/// The dedup scope is the consumer group (`processor`): two different
/// logical handlers may each process the same event once.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// Claim an event id for processing
    ///
    /// Returns `true` if this call won the race and the caller should
    /// apply the side effect, `false` if the event was already claimed or
    /// processed by this consumer group.
    async fn mark_if_absent(&self, event_id: Uuid, event_type: &str) -> Result<bool, StoreError>;

    /// Whether a delivery record exists for this event id
    async fn is_processed(&self, event_id: Uuid) -> Result<bool, StoreError>;

    /// Release a claim whose side effect failed before completing
    ///
    /// Without this, a transient failure after a won claim would suppress
    /// the event forever on redelivery.
    async fn release(&self, event_id: Uuid) -> Result<(), StoreError>;
}

/// Postgres-backed guard, shared by all instances of one consumer group
///
/// Rows live in `processed_events` keyed by `(event_id, processor)`.
pub struct PgProcessedStore {
    pool: PgPool,
    processor: String,
}

impl PgProcessedStore {
    pub fn new(pool: PgPool, processor: impl Into<String>) -> Self {
        Self {
            pool,
            processor: processor.into(),
        }
    }

    /// Delete delivery records older than `retention_days`
    ///
    /// Safe once the retention window exceeds the broker's maximum
    /// redelivery window. Returns the number of purged records.
    pub async fn purge_older_than(&self, retention_days: i32) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE processor = $1
              AND processed_at < now() - make_interval(days => $2)
            "#,
        )
        .bind(&self.processor)
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProcessedStore for PgProcessedStore {
    async fn mark_if_absent(&self, event_id: Uuid, event_type: &str) -> Result<bool, StoreError> {
        // ON CONFLICT DO NOTHING makes the insert the atomic
        // compare-and-set: exactly one concurrent caller sees one row
        // affected.
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, processor, event_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, processor) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(&self.processor)
        .bind(event_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1 AND processor = $2)",
        )
        .bind(event_id)
        .bind(&self.processor)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn release(&self, event_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = $1 AND processor = $2")
            .bind(event_id)
            .bind(&self.processor)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// In-memory guard for tests and local development
///
/// Atomic within one process only; production consumers must use
/// [`PgProcessedStore`].
#[derive(Default)]
pub struct InMemoryProcessedStore {
    seen: Mutex<HashSet<Uuid>>,
}

impl InMemoryProcessedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivery records currently held
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProcessedStore for InMemoryProcessedStore {
    async fn mark_if_absent(&self, event_id: Uuid, _event_type: &str) -> Result<bool, StoreError> {
        Ok(self.seen.lock().unwrap().insert(event_id))
    }

    async fn is_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.seen.lock().unwrap().contains(&event_id))
    }

    async fn release(&self, event_id: Uuid) -> Result<(), StoreError> {
        self.seen.lock().unwrap().remove(&event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_mark_if_absent_first_call_wins() {
        let store = InMemoryProcessedStore::new();
        let id = Uuid::new_v4();

        assert!(store.mark_if_absent(id, "OrderCreated").await.unwrap());
        assert!(!store.mark_if_absent(id, "OrderCreated").await.unwrap());
        assert!(store.is_processed(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_allows_reclaim() {
        let store = InMemoryProcessedStore::new();
        let id = Uuid::new_v4();

        assert!(store.mark_if_absent(id, "OrderCreated").await.unwrap());
        store.release(id).await.unwrap();
        assert!(!store.is_processed(id).await.unwrap());
        assert!(store.mark_if_absent(id, "OrderCreated").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(InMemoryProcessedStore::new());
        let id = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark_if_absent(id, "OrderCreated").await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }
}
