//! # Event Consumer Dispatch
//!
//! Consumer-side building blocks for processing bus events with
//! at-least-once delivery:
//!
//! - [`HandlerOutcome`] — the reified result of handling one delivery:
//!   acknowledge, retry after a delay, or dead-letter. Returned, never
//!   thrown, so the dispatch loop can apply backoff mechanically.
//! - [`EventHandler`] — the trait a module implements per subscription.
//! - [`Dispatcher`] — subscribes to a subject, drives each message through
//!   the delivery state machine, applies the retry policy, and routes
//!   exhausted or permanently-failed messages to the dead-letter store.
//! - [`ProcessedStore`] — the idempotency guard. Atomic check-and-mark
//!   across horizontally-scaled consumer instances (Postgres in
//!   production, in-memory for tests).
//! - [`DeadLetterStore`] — terminal storage for messages that cannot be
//!   processed, kept for operator inspection.
//!
//! Handlers own failure classification: transient infrastructure failures
//! map to `Retry`, schema/validation failures map to `DeadLetter`.
//! Duplicate deliveries are not failures; the guard suppresses them.

mod dead_letter;
mod delivery;
mod dispatcher;
mod processed_store;

pub use dead_letter::{DeadLetterEntry, DeadLetterStore, InMemoryDeadLetterStore, PgDeadLetterStore};
pub use delivery::{DeliveryState, InvalidTransition};
pub use dispatcher::Dispatcher;
pub use processed_store::{InMemoryProcessedStore, PgProcessedStore, ProcessedStore};

use async_trait::async_trait;
use event_bus::BusMessage;
use std::time::Duration;

/// Result of handling a single delivery
///
/// `Retry` with `after: None` defers to the dispatcher's exponential
/// backoff schedule; a `Some` delay overrides it for this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processing succeeded (or was already done); remove from redelivery
    Ack,
    /// Transient failure; redeliver after a delay
    Retry { after: Option<Duration> },
    /// Permanent failure; route to the dead-letter store, never retry
    DeadLetter(String),
}

impl HandlerOutcome {
    /// Retry using the dispatcher's backoff schedule
    pub fn retry() -> Self {
        HandlerOutcome::Retry { after: None }
    }

    /// Retry after an explicit delay
    pub fn retry_after(delay: Duration) -> Self {
        HandlerOutcome::Retry { after: Some(delay) }
    }
}

/// Errors from the idempotency guard and dead-letter stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A durable subscription's message handler
///
/// Implementations must be safe to call concurrently from multiple
/// consumer instances: any per-event side effect has to be protected by
/// the idempotency guard, not by process-local state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs and the dead-letter record
    fn name(&self) -> &str;

    /// Handle one delivery of a message
    ///
    /// Must not panic on malformed input; classification of the failure
    /// (transient vs permanent) is expressed through the returned outcome.
    async fn handle(&self, msg: &BusMessage) -> HandlerOutcome;
}
