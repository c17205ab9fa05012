//! OrderCreated publishing
//!
//! Two publish paths exist:
//!
//! 1. [`notify_order_created`] — direct publish with a bounded retry.
//!    The order row must already be durably committed; publish is *not*
//!    part of that transaction, so a crash between commit and publish
//!    loses the notification. That window is accepted and documented
//!    here, not hidden.
//! 2. [`enqueue_order_created`] + [`start_outbox_publisher`] — the
//!    transactional outbox. The envelope is written in the caller's
//!    transaction and a relay task publishes it later, closing the loss
//!    window at the cost of an extra table and poll loop.
//!
//! Either way the event is a notification of a completed fact, never a
//! request to perform one.

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusError, BusResult, EventBus, EventEnvelope};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::contracts::{OrderCreatedV1, ORDER_CREATED_EVENT_TYPE, ORDER_CREATED_SUBJECT};
use crate::repos::outbox_repo;

/// Errors from the outbox relay
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Build the envelope for an OrderCreated payload
///
/// `event_id` and `occurred_at` are assigned here, once; the payload is
/// immutable afterwards.
pub fn order_created_envelope(payload: OrderCreatedV1) -> EventEnvelope<OrderCreatedV1> {
    EventEnvelope::new(
        ORDER_CREATED_EVENT_TYPE.to_string(),
        "orders".to_string(),
        payload,
    )
    .with_source_version(env!("CARGO_PKG_VERSION").to_string())
}

/// Publish an OrderCreated event directly to the bus
///
/// Precondition: the order row is already durably committed. On success
/// the broker holds the event and will deliver it at least once to every
/// active subscriber; the returned `event_id` is the idempotency key
/// consumers deduplicate on.
///
/// Publish failures are transient; this function retries with backoff and
/// then surfaces the error to the caller, who may retry again or accept
/// the lost notification (see module docs).
pub async fn notify_order_created(
    bus: &Arc<dyn EventBus>,
    payload: OrderCreatedV1,
) -> BusResult<Uuid> {
    let envelope = order_created_envelope(payload);
    let event_id = envelope.event_id;

    let bytes = serde_json::to_vec(&envelope)
        .map_err(|e| BusError::SerializationError(e.to_string()))?;

    let retry = RetryConfig::default();
    retry_with_backoff(
        || {
            let bytes = bytes.clone();
            async move { bus.publish(ORDER_CREATED_SUBJECT, bytes).await }
        },
        &retry,
        "publish_order_created",
    )
    .await?;

    tracing::info!(
        event_id = %event_id,
        subject = ORDER_CREATED_SUBJECT,
        "Published OrderCreated event"
    );

    Ok(event_id)
}

/// Enqueue an OrderCreated event in the outbox, inside the caller's
/// transaction
///
/// Commits atomically with the order write; the relay publishes it later.
/// Returns the assigned `event_id`.
pub async fn enqueue_order_created(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payload: OrderCreatedV1,
) -> Result<Uuid, sqlx::Error> {
    let envelope = order_created_envelope(payload);
    let event_id = envelope.event_id;

    let json = serde_json::to_value(&envelope).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    outbox_repo::insert(tx, event_id, ORDER_CREATED_SUBJECT, json).await?;

    Ok(event_id)
}

/// Background relay task: polls the outbox and publishes pending events
pub async fn start_outbox_publisher(db: PgPool, bus: Arc<dyn EventBus>) {
    tracing::info!("Starting outbox publisher task");

    let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(100));

    loop {
        interval.tick().await;

        match publish_pending_events(&db, &bus).await {
            Ok(count) if count > 0 => {
                tracing::info!(count = count, "Published events from outbox");
            }
            Err(e) => {
                tracing::error!(error = %e, "Error publishing events from outbox");
            }
            _ => {}
        }
    }
}

/// Publish one batch of pending outbox rows
///
/// Rows are marked published in the same transaction that locked them.
/// If the bus rejects a publish the transaction rolls back and the whole
/// batch stays pending, so a row may be published more than once across
/// relay runs; consumers already tolerate at-least-once delivery.
pub async fn publish_pending_events(
    db: &PgPool,
    bus: &Arc<dyn EventBus>,
) -> Result<usize, OutboxError> {
    let mut tx = db.begin().await?;

    let pending = outbox_repo::fetch_pending(&mut tx, 50).await?;
    if pending.is_empty() {
        return Ok(0);
    }

    let mut published = 0;
    for event in &pending {
        let bytes = serde_json::to_vec(&event.payload)?;
        bus.publish(&event.subject, bytes).await?;
        outbox_repo::mark_published(&mut tx, event.event_id).await?;
        published += 1;
    }

    tx.commit().await?;

    Ok(published)
}
