//! OrderCreated V1 Contract Types
//!
//! The cart module keeps its own copy of these types; the two must agree
//! field-for-field on the JSON wire shape (case-sensitive). Do not add
//! validations here beyond the wire shape itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject the OrderCreated event is published on
pub const ORDER_CREATED_SUBJECT: &str = "orders.events.order.created";

/// Envelope `event_type` discriminator for OrderCreated
pub const ORDER_CREATED_EVENT_TYPE: &str = "OrderCreated";

/// Payload for the OrderCreated event
///
/// This is the payload type used with `EventEnvelope<OrderCreatedV1>`.
/// It records a completed fact: the order row is already durably
/// committed when this payload is constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderCreatedV1 {
    /// Identifier of the committed order row
    pub order_id: i32,

    /// Owning user
    pub username: String,

    /// Originating cart; the consumer clears this cart
    pub cart_id: String,

    /// Order total
    pub total: f64,

    /// When the order was placed
    pub order_date: DateTime<Utc>,

    /// Ordered line items
    pub items: Vec<OrderItemV1>,
}

/// A single ordered line item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemV1 {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: f64,
}
