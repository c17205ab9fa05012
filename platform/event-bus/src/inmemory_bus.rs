//! In-memory implementation of the EventBus trait for testing and development

use crate::{BusMessage, BusResult, EventBus};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

/// EventBus implementation using in-memory channels
///
/// Suitable for unit tests, local development without Docker, and
/// integration tests that need a fast, isolated bus.
///
/// Messages are fanned out to all subscribers through a Tokio broadcast
/// channel and filtered per-subscriber against the subscription pattern.
///
/// # Example
/// ```rust
/// use event_bus::{EventBus, InMemoryBus};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// // Subscribe before publishing
/// let mut stream = bus.subscribe("orders.events.>").await?;
///
/// bus.publish("orders.events.order.created", b"{}".to_vec()).await?;
///
/// let msg = stream.next().await.unwrap();
/// assert_eq!(msg.subject, "orders.events.order.created");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    // Single broadcast channel for all subjects; subscribers filter.
    // Slow subscribers that fall more than `capacity` messages behind
    // lose the oldest messages (logged, not fatal).
    sender: Arc<broadcast::Sender<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory event bus with a 1024-message buffer
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new in-memory event bus with a custom buffer size
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Check whether a subject matches a subscription pattern
    ///
    /// NATS-style wildcards:
    /// - `*` matches exactly one token
    /// - `>` matches one or more trailing tokens
    fn matches_pattern(subject: &str, pattern: &str) -> bool {
        let mut subject_tokens = subject.split('.');
        let mut pattern_tokens = pattern.split('.').peekable();

        loop {
            match (subject_tokens.next(), pattern_tokens.next()) {
                (_, Some(">")) => return true,
                (Some(_), Some("*")) => continue,
                (Some(s), Some(p)) if s == p => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        let msg = BusMessage::new(subject.to_string(), payload);

        // A send error only means there are no subscribers yet; the
        // broker analogue is publishing to a subject nobody listens on.
        let _ = self.sender.send(msg);

        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let mut receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(msg) => {
                        if Self::matches_pattern(&msg.subject, &pattern) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            pattern = %pattern,
                            skipped = skipped,
                            "InMemoryBus subscriber lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}
