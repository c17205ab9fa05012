//! # EventBus Abstraction
//!
//! Publish/subscribe messaging shared by the order and cart services.
//!
//! The bus is the only coupling point between modules: the order service
//! publishes facts after its own writes have committed, and the cart
//! service reacts to them. Delivery is at-least-once; ordering is only
//! meaningful within a single subject token (e.g. one cart), never across
//! unrelated events.
//!
//! ## Implementations
//!
//! - **NatsBus**: production implementation backed by NATS
//! - **InMemoryBus**: in-process implementation for dev and tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{EventBus, NatsBus, InMemoryBus};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: NATS
//! let client = async_nats::connect("nats://localhost:4222").await?;
//! let bus: Arc<dyn EventBus> = Arc::new(NatsBus::new(client));
//!
//! // Dev/test: in-memory
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
//!
//! let payload = serde_json::to_vec(&serde_json::json!({
//!     "event_type": "OrderCreated",
//!     "order_id": 42
//! }))?;
//! bus.publish("orders.events.order.created", payload).await?;
//!
//! let mut stream = bus.subscribe("orders.events.>").await?;
//! while let Some(msg) = futures::StreamExt::next(&mut stream).await {
//!     println!("received {} bytes on {}", msg.payload.len(), msg.subject);
//! }
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory_bus;
mod nats_bus;

pub mod consumer_retry;

pub use envelope::{validate_envelope_fields, EventEnvelope};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject this message was published to
    pub subject: String,
    /// The message payload (raw bytes, JSON envelope in practice)
    pub payload: Vec<u8>,
    /// Optional headers
    pub headers: Option<std::collections::HashMap<String, String>>,
    /// Optional reply-to subject (request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
            reply_to: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: std::collections::HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add a reply-to subject
    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging
///
/// Implementations guarantee at-least-once delivery to each active
/// subscriber once `publish` has returned `Ok`. They make no ordering
/// promise across distinct subjects.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    ///
    /// On `Ok(())` the message is handed to the broker and will be
    /// delivered at least once to every active subscriber. A failure is
    /// transient from the caller's point of view; the caller owns the
    /// decision to retry or accept the lost notification.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern
    ///
    /// Patterns support NATS-style wildcards:
    /// - `*` matches a single token (`orders.*.created`)
    /// - `>` matches one or more trailing tokens (`orders.events.>`)
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}
