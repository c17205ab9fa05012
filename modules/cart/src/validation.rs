//! OrderCreated payload validation
//!
//! A payload that fails here is a permanent failure: it is dead-lettered,
//! never retried.

use crate::contracts::OrderCreatedV1;

/// Validation failures for incoming OrderCreated payloads
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("cart_id cannot be empty")]
    EmptyCartId,

    #[error("order_id must be positive, got {0}")]
    InvalidOrderId(i32),

    #[error("total cannot be negative, got {0}")]
    NegativeTotal(f64),

    #[error("item {index}: quantity must be at least 1, got {quantity}")]
    InvalidQuantity { index: usize, quantity: i32 },

    #[error("item {index}: unit_price cannot be negative, got {unit_price}")]
    NegativeUnitPrice { index: usize, unit_price: f64 },
}

/// Validate an OrderCreated payload before acting on it
pub fn validate_order_created(payload: &OrderCreatedV1) -> Result<(), ValidationError> {
    if payload.cart_id.trim().is_empty() {
        return Err(ValidationError::EmptyCartId);
    }

    if payload.order_id < 1 {
        return Err(ValidationError::InvalidOrderId(payload.order_id));
    }

    if payload.total < 0.0 {
        return Err(ValidationError::NegativeTotal(payload.total));
    }

    for (index, item) in payload.items.iter().enumerate() {
        if item.quantity < 1 {
            return Err(ValidationError::InvalidQuantity {
                index,
                quantity: item.quantity,
            });
        }
        if item.unit_price < 0.0 {
            return Err(ValidationError::NegativeUnitPrice {
                index,
                unit_price: item.unit_price,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::OrderItemV1;
    use chrono::Utc;

    fn valid_payload() -> OrderCreatedV1 {
        OrderCreatedV1 {
            order_id: 42,
            username: "astrid".to_string(),
            cart_id: "cart-7f3a".to_string(),
            total: 56.00,
            order_date: Utc::now(),
            items: vec![OrderItemV1 {
                product_id: 9,
                quantity: 2,
                unit_price: 28.00,
            }],
        }
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate_order_created(&valid_payload()).is_ok());
    }

    #[test]
    fn test_empty_items_is_valid() {
        // An order with no line items is odd but not malformed; the
        // consumer treats "nothing to clear" as success anyway.
        let mut payload = valid_payload();
        payload.items.clear();
        payload.total = 0.0;
        assert!(validate_order_created(&payload).is_ok());
    }

    #[test]
    fn test_empty_cart_id_rejected() {
        let mut payload = valid_payload();
        payload.cart_id = "  ".to_string();
        assert!(matches!(
            validate_order_created(&payload),
            Err(ValidationError::EmptyCartId)
        ));
    }

    #[test]
    fn test_non_positive_order_id_rejected() {
        let mut payload = valid_payload();
        payload.order_id = 0;
        assert!(matches!(
            validate_order_created(&payload),
            Err(ValidationError::InvalidOrderId(0))
        ));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut payload = valid_payload();
        payload.items[0].quantity = 0;
        assert!(matches!(
            validate_order_created(&payload),
            Err(ValidationError::InvalidQuantity { index: 0, quantity: 0 })
        ));
    }

    #[test]
    fn test_negative_unit_price_rejected() {
        let mut payload = valid_payload();
        payload.items[0].unit_price = -1.0;
        assert!(matches!(
            validate_order_created(&payload),
            Err(ValidationError::NegativeUnitPrice { index: 0, .. })
        ));
    }
}
