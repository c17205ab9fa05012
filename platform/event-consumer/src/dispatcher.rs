//! Dispatch loop connecting a bus subscription to an [`EventHandler`]
//!
//! The dispatcher pulls messages, drives each through the delivery state
//! machine, and applies the retry policy mechanically based on the
//! outcome the handler returns. Failures never propagate back to the
//! publisher; the only escalation path is the dead-letter store.

use crate::{DeadLetterStore, DeliveryState, EventHandler, HandlerOutcome};
use event_bus::consumer_retry::RetryConfig;
use event_bus::{BusMessage, BusResult, EventBus};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

/// Subscribes to one subject and dispatches messages to one handler
///
/// Multiple dispatcher instances (in one process or across processes) may
/// run against the same subject; dedup is the handler's responsibility
/// via the idempotency guard.
pub struct Dispatcher {
    bus: Arc<dyn EventBus>,
    subject: String,
    retry: RetryConfig,
    dead_letters: Arc<dyn DeadLetterStore>,
}

impl Dispatcher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        subject: impl Into<String>,
        retry: RetryConfig,
        dead_letters: Arc<dyn DeadLetterStore>,
    ) -> Self {
        Self {
            bus,
            subject: subject.into(),
            retry,
            dead_letters,
        }
    }

    /// Run the dispatch loop until shutdown is signalled or the stream ends
    ///
    /// Shutdown stops pulling new messages; a message already being
    /// processed runs to its acknowledgment decision before the loop
    /// exits. In-flight work is never silently dropped.
    pub async fn run(
        &self,
        handler: Arc<dyn EventHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BusResult<()> {
        let mut stream = self.bus.subscribe(&self.subject).await?;

        tracing::info!(
            subject = %self.subject,
            handler = handler.name(),
            "Consumer subscribed"
        );

        loop {
            tokio::select! {
                maybe_msg = stream.next() => {
                    match maybe_msg {
                        Some(msg) => self.dispatch(handler.as_ref(), &msg).await,
                        None => {
                            tracing::warn!(subject = %self.subject, "Subscription stream ended");
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A closed channel means the coordinating side is gone;
                    // treat it the same as an explicit shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(
                            subject = %self.subject,
                            handler = handler.name(),
                            "Shutdown requested, no longer pulling messages"
                        );
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Drive one message to a terminal state (Acked or DeadLettered)
    async fn dispatch(&self, handler: &dyn EventHandler, msg: &BusMessage) {
        let span = tracing::info_span!(
            "dispatch_event",
            subject = %msg.subject,
            handler = handler.name()
        );

        async {
            let mut state = DeliveryState::Delivered;
            let mut attempt: u32 = 0;

            while !state.is_terminal() {
                attempt += 1;
                state = advance(state, DeliveryState::Processing);

                match handler.handle(msg).await {
                    HandlerOutcome::Ack => {
                        state = advance(state, DeliveryState::Acked);
                        tracing::debug!(attempt = attempt, "Delivery acked");
                    }
                    HandlerOutcome::Retry { after } => {
                        if attempt >= self.retry.max_attempts {
                            state = advance(state, DeliveryState::DeadLettered);
                            self.dead_letter(msg, "retry attempts exhausted", attempt).await;
                            continue;
                        }

                        state = advance(state, DeliveryState::Retrying);
                        let delay = after.unwrap_or_else(|| self.retry.delay_for_attempt(attempt));

                        tracing::warn!(
                            attempt = attempt,
                            max_attempts = self.retry.max_attempts,
                            backoff_ms = delay.as_millis(),
                            "Transient failure, redelivering after backoff"
                        );

                        tokio::time::sleep(delay).await;
                        state = advance(state, DeliveryState::Delivered);
                    }
                    HandlerOutcome::DeadLetter(reason) => {
                        state = advance(state, DeliveryState::DeadLettered);
                        self.dead_letter(msg, &reason, attempt).await;
                    }
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn dead_letter(&self, msg: &BusMessage, reason: &str, attempt: u32) {
        if let Err(e) = self.dead_letters.insert(msg, reason, attempt).await {
            // The message is lost to inspection but the loop must go on;
            // this is the one failure with no further escalation path.
            tracing::error!(
                subject = %msg.subject,
                error = %e,
                reason = %reason,
                "Failed to write to DLQ - event may be lost!"
            );
        }
    }
}

/// Apply a transition that is legal by construction of the dispatch loop
fn advance(state: DeliveryState, to: DeliveryState) -> DeliveryState {
    match state.transition(to) {
        Ok(next) => next,
        Err(err) => {
            debug_assert!(false, "dispatch loop produced {err}");
            tracing::error!(error = %err, "Illegal delivery transition");
            to
        }
    }
}
