//! OrderCreated V1 Contract Types (consumer side)
//!
//! Deliberately a local copy rather than a shared crate: modules stay
//! decoupled and evolve against the JSON wire shape. Field names must
//! match the orders module EXACTLY (case-sensitive).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject the cart consumer subscribes to
pub const ORDER_CREATED_SUBJECT: &str = "orders.events.order.created";

/// Payload carried by `EventEnvelope<OrderCreatedV1>`
///
/// The event is a notification of a committed order; the only field the
/// cart module acts on is `cart_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderCreatedV1 {
    pub order_id: i32,
    pub username: String,
    pub cart_id: String,
    pub total: f64,
    pub order_date: DateTime<Utc>,
    pub items: Vec<OrderItemV1>,
}

/// A single ordered line item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemV1 {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: f64,
}
