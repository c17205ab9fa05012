//! NATS-backed `EventBus`
//!
//! Thin adapter over `async_nats::Client`: publish maps straight onto a
//! core NATS publish, subscribe yields a stream of [`BusMessage`]s built
//! by [`bus_message_from_parts`]. Subject wildcard semantics are the
//! broker's own; nothing here interprets subjects.

use crate::{BusError, BusMessage, BusResult, EventBus};
use async_nats::{Client, HeaderMap};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;

/// Production [`EventBus`] talking to a NATS server
///
/// # Example
/// ```rust,no_run
/// use event_bus::{EventBus, NatsBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = async_nats::connect("nats://localhost:4222").await?;
/// let bus = NatsBus::new(client);
///
/// bus.publish("orders.events.order.created", b"{}".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Wrap an already-connected client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying NATS client, for features the trait does not expose
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Build a [`BusMessage`] from the pieces of a raw NATS delivery
///
/// NATS allows repeated header names; the bus message keeps only the
/// first value of each, which is all the envelope layer consumes.
fn bus_message_from_parts(
    subject: String,
    payload: Vec<u8>,
    reply: Option<String>,
    headers: Option<&HeaderMap>,
) -> BusMessage {
    let mut msg = BusMessage::new(subject, payload);

    if let Some(reply) = reply {
        msg = msg.with_reply_to(reply);
    }

    let flattened: HashMap<String, String> = headers
        .into_iter()
        .flat_map(|map| map.iter())
        .filter_map(|(name, values)| values.first().map(|v| (name.to_string(), v.to_string())))
        .collect();
    if !flattened.is_empty() {
        msg = msg.with_headers(flattened);
    }

    msg
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let stream = subscriber.map(|delivery| {
            bus_message_from_parts(
                delivery.subject.to_string(),
                delivery.payload.to_vec(),
                delivery.reply.map(|r| r.to_string()),
                delivery.headers.as_ref(),
            )
        });

        Ok(stream.boxed())
    }
}
