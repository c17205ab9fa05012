//! Dead-letter storage for messages that cannot be processed
//!
//! Messages land here after exhausting the retry budget or on a permanent
//! (schema/validation) failure. Dead-lettered messages are never
//! redelivered to the normal handler; they wait for operator inspection.

use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::BusMessage;
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

/// One dead-lettered message
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub event_id: Option<Uuid>,
    pub subject: String,
    pub envelope_json: Option<serde_json::Value>,
    pub error: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
}

/// Terminal store for failed messages
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Record a failed message together with the failure reason and the
    /// number of attempts made
    async fn insert(&self, msg: &BusMessage, error: &str, retry_count: u32)
        -> Result<(), StoreError>;
}

/// Postgres-backed DLQ writing to the `failed_events` table
pub struct PgDeadLetterStore {
    pool: PgPool,
}

impl PgDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterStore for PgDeadLetterStore {
    async fn insert(
        &self,
        msg: &BusMessage,
        error: &str,
        retry_count: u32,
    ) -> Result<(), StoreError> {
        // Best-effort envelope extraction: a message can be dead-lettered
        // precisely because its envelope does not parse.
        let envelope_json = serde_json::from_slice::<serde_json::Value>(&msg.payload).ok();

        let event_id = envelope_json
            .as_ref()
            .and_then(|v| v.get("event_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        sqlx::query(
            r#"
            INSERT INTO failed_events (event_id, subject, envelope_json, error, retry_count)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event_id)
        .bind(&msg.subject)
        .bind(envelope_json)
        .bind(error)
        .bind(retry_count as i32)
        .execute(&self.pool)
        .await?;

        tracing::error!(
            event_id = %event_id.map(|id| id.to_string()).unwrap_or_else(|| "unknown".into()),
            subject = %msg.subject,
            retry_count = retry_count,
            error = %error,
            "Event moved to DLQ"
        );

        Ok(())
    }
}

/// In-memory DLQ for tests
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the dead-lettered entries
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(
        &self,
        msg: &BusMessage,
        error: &str,
        retry_count: u32,
    ) -> Result<(), StoreError> {
        let envelope_json = serde_json::from_slice::<serde_json::Value>(&msg.payload).ok();

        let event_id = envelope_json
            .as_ref()
            .and_then(|v| v.get("event_id"))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        self.entries.lock().unwrap().push(DeadLetterEntry {
            event_id,
            subject: msg.subject.clone(),
            envelope_json,
            error: error.to_string(),
            retry_count,
            failed_at: Utc::now(),
        });

        Ok(())
    }
}
