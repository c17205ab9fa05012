//! OrderCreated Consumer
//!
//! Subscribes to `orders.events.order.created` and clears the originating
//! cart. Processing is idempotent: the delivery record claim in the
//! shared guard ensures the side effect runs at most once per event id
//! even with multiple consumer instances racing on the same delivery.

use async_trait::async_trait;
use event_bus::consumer_retry::RetryConfig;
use event_bus::{BusMessage, EventBus, EventEnvelope};
use event_consumer::{
    DeadLetterStore, Dispatcher, EventHandler, HandlerOutcome, PgDeadLetterStore,
    PgProcessedStore, ProcessedStore,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::contracts::{OrderCreatedV1, ORDER_CREATED_SUBJECT};
use crate::services::{CartStore, PgCartStore};
use crate::validation::validate_order_created;

/// Consumer group identifier; the idempotency scope for this handler
pub const CART_CONSUMER_GROUP: &str = "cart-consumer";

/// Handler clearing carts in response to OrderCreated events
///
/// Failure classification:
/// - unparseable envelope or invalid payload -> dead-letter (permanent)
/// - guard or cart store unreachable/timed out -> retry (transient)
/// - duplicate delivery -> ack without re-executing the side effect
pub struct OrderCreatedHandler {
    carts: Arc<dyn CartStore>,
    processed: Arc<dyn ProcessedStore>,
    guard_timeout: Duration,
    side_effect_timeout: Duration,
}

impl OrderCreatedHandler {
    pub fn new(carts: Arc<dyn CartStore>, processed: Arc<dyn ProcessedStore>) -> Self {
        Self {
            carts,
            processed,
            guard_timeout: Duration::from_secs(5),
            side_effect_timeout: Duration::from_secs(10),
        }
    }

    /// Override the bounded timeouts on the guard and side-effect calls
    pub fn with_timeouts(mut self, guard: Duration, side_effect: Duration) -> Self {
        self.guard_timeout = guard;
        self.side_effect_timeout = side_effect;
        self
    }

    /// Release a claim whose side effect did not complete, so broker
    /// redelivery can process the event again
    async fn release_claim(&self, event_id: uuid::Uuid) {
        if let Err(e) = self.processed.release(event_id).await {
            // If the release itself fails the claim survives and later
            // redeliveries will ack without clearing; surface it loudly.
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to release delivery claim - event may be suppressed on redelivery!"
            );
        }
    }
}

#[async_trait]
impl EventHandler for OrderCreatedHandler {
    fn name(&self) -> &str {
        CART_CONSUMER_GROUP
    }

    async fn handle(&self, msg: &BusMessage) -> HandlerOutcome {
        // Schema failures are permanent: dead-letter, never retry
        let envelope: EventEnvelope<OrderCreatedV1> = match serde_json::from_slice(&msg.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                return HandlerOutcome::DeadLetter(format!("invalid envelope: {e}"));
            }
        };

        if let Err(e) = validate_order_created(&envelope.payload) {
            return HandlerOutcome::DeadLetter(format!("invalid payload: {e}"));
        }

        let event_id = envelope.event_id;
        let order_id = envelope.payload.order_id;
        let cart_id = &envelope.payload.cart_id;

        tracing::info!(
            event_id = %event_id,
            order_id = order_id,
            cart_id = %cart_id,
            "Received OrderCreated event, clearing cart"
        );

        // Claim the event id before touching the cart; exactly one
        // concurrent instance wins this compare-and-set.
        let claimed = match timeout(
            self.guard_timeout,
            self.processed.mark_if_absent(event_id, &envelope.event_type),
        )
        .await
        {
            Ok(Ok(claimed)) => claimed,
            Ok(Err(e)) => {
                tracing::warn!(event_id = %event_id, error = %e, "Idempotency guard unreachable");
                return HandlerOutcome::retry();
            }
            Err(_) => {
                tracing::warn!(event_id = %event_id, "Idempotency guard timed out");
                return HandlerOutcome::retry();
            }
        };

        if !claimed {
            tracing::debug!(
                event_id = %event_id,
                cart_id = %cart_id,
                "Event already processed, skipping"
            );
            return HandlerOutcome::Ack;
        }

        match timeout(self.side_effect_timeout, self.carts.clear_cart(cart_id)).await {
            Ok(Ok(0)) => {
                // Already cleared or never populated: a valid terminal
                // state, recorded as success.
                tracing::warn!(cart_id = %cart_id, "No items found in cart");
                HandlerOutcome::Ack
            }
            Ok(Ok(removed)) => {
                tracing::info!(
                    event_id = %event_id,
                    cart_id = %cart_id,
                    removed = removed,
                    "Successfully cleared cart"
                );
                HandlerOutcome::Ack
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    event_id = %event_id,
                    cart_id = %cart_id,
                    error = %e,
                    "Cart store unreachable, will retry"
                );
                self.release_claim(event_id).await;
                HandlerOutcome::retry()
            }
            Err(_) => {
                tracing::warn!(
                    event_id = %event_id,
                    cart_id = %cart_id,
                    "Cart clear timed out, will retry"
                );
                self.release_claim(event_id).await;
                HandlerOutcome::retry()
            }
        }
    }
}

/// Start the OrderCreated consumer task
///
/// Spawns a dispatcher that subscribes to the OrderCreated subject and
/// runs until `shutdown` flips to true. Shutdown stops pulling new
/// messages; an in-flight message finishes its acknowledgment decision.
/// The caller must await the returned handle before exiting so that the
/// in-flight decision is not cut short by process teardown.
pub fn start_order_created_consumer(
    bus: Arc<dyn EventBus>,
    pool: PgPool,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Starting OrderCreated consumer");

        let processed: Arc<dyn ProcessedStore> =
            Arc::new(PgProcessedStore::new(pool.clone(), CART_CONSUMER_GROUP));
        let dead_letters: Arc<dyn DeadLetterStore> = Arc::new(PgDeadLetterStore::new(pool.clone()));
        let carts: Arc<dyn CartStore> = Arc::new(PgCartStore::new(pool));

        let handler = Arc::new(OrderCreatedHandler::new(carts, processed));
        let dispatcher = Dispatcher::new(
            bus,
            ORDER_CREATED_SUBJECT,
            RetryConfig::default(),
            dead_letters,
        );

        if let Err(e) = dispatcher.run(handler, shutdown).await {
            tracing::error!(error = %e, "OrderCreated consumer failed to start");
        }

        tracing::warn!("OrderCreated consumer stopped");
    })
}
