//! Outbox repository for reliable event publishing
//!
//! Transactional outbox: the envelope is persisted in the same database
//! transaction as the order write, so a crash between commit and publish
//! cannot lose the notification. A relay task drains pending rows to the
//! bus.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// A pending outbox row ready to be published
#[derive(Debug, sqlx::FromRow)]
pub struct PendingEvent {
    pub event_id: Uuid,
    pub subject: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert an event into the outbox within the caller's transaction
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
    subject: &str,
    payload: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO events_outbox (event_id, subject, payload, status)
        VALUES ($1, $2, $3, 'pending')
        "#,
    )
    .bind(event_id)
    .bind(subject)
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Fetch a batch of pending events, locking them against other relays
///
/// `FOR UPDATE SKIP LOCKED` lets multiple relay instances drain the
/// outbox concurrently without double-publishing within one batch window.
pub async fn fetch_pending(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<PendingEvent>, sqlx::Error> {
    sqlx::query_as::<_, PendingEvent>(
        r#"
        SELECT event_id, subject, payload, created_at
        FROM events_outbox
        WHERE status = 'pending'
        ORDER BY created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
}

/// Mark an outbox row as published
pub async fn mark_published(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE events_outbox
        SET status = 'published', published_at = now()
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
