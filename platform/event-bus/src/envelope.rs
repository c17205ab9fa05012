//! # Event Envelope
//!
//! Versioned wrapper carried by every event on the bus.
//!
//! ## Envelope Fields
//!
//! - `event_id`: unique identifier, assigned once at construction; the
//!   idempotency key for consumers
//! - `event_type`: discriminator (e.g. "OrderCreated"), fixed at construction
//! - `occurred_at`: timestamp set when the envelope is built
//! - `source_module`: module that produced the event
//! - `source_version`: semantic version of the source module
//! - `correlation_id`: links related events in a business transaction
//! - `payload`: the domain fact; immutable after publish
//!
//! Consumers must not rely on publish-time ordering across different event
//! types, only within a single logical key (cart id, order id).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard event envelope for all cross-module events
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type
///
/// # Examples
///
/// ```rust
/// use event_bus::EventEnvelope;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct OrderCreated {
///     order_id: i32,
///     cart_id: String,
/// }
///
/// let envelope = EventEnvelope::new(
///     "OrderCreated".to_string(),
///     "orders".to_string(),
///     OrderCreated { order_id: 42, cart_id: "cart-7".to_string() },
/// )
/// .with_correlation_id(Some("checkout-123".to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// Event discriminator, fixed at construction (e.g. "OrderCreated")
    pub event_type: String,

    /// Timestamp when the event was generated
    pub occurred_at: DateTime<Utc>,

    /// Module that generated the event (e.g. "orders", "cart")
    pub source_module: String,

    /// Semantic version of the source module
    pub source_version: String,

    /// Links related events in a business transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Event-specific payload; never mutated after publish
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new event envelope with a fresh `event_id` and `occurred_at`
    ///
    /// The source_version defaults to "1.0.0"; callers should override it
    /// with their own `CARGO_PKG_VERSION`.
    pub fn new(event_type: String, source_module: String, payload: T) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            occurred_at: Utc::now(),
            source_module,
            source_version: "1.0.0".to_string(),
            correlation_id: None,
            payload,
        }
    }

    /// Create an envelope with an explicit event_id (useful for testing)
    pub fn with_event_id(
        event_id: Uuid,
        event_type: String,
        source_module: String,
        payload: T,
    ) -> Self {
        Self {
            event_id,
            event_type,
            occurred_at: Utc::now(),
            source_module,
            source_version: "1.0.0".to_string(),
            correlation_id: None,
            payload,
        }
    }

    /// Set the source version
    pub fn with_source_version(mut self, version: String) -> Self {
        self.source_version = version;
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Validate the envelope fields of a raw JSON event
///
/// # Validation Rules
///
/// - `event_id`: must be present (string)
/// - `event_type`: must be non-empty
/// - `occurred_at`: must be present
/// - `source_module`: must be non-empty
///
/// Returns a descriptive error string if validation fails. A failure here
/// is a permanent (schema) failure, never a transient one.
pub fn validate_envelope_fields(envelope: &serde_json::Value) -> Result<(), String> {
    envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_id")?;

    let event_type = envelope
        .get("event_type")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_type")?;

    if event_type.is_empty() {
        return Err("event_type cannot be empty".to_string());
    }

    envelope
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid occurred_at")?;

    let source_module = envelope
        .get("source_module")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid source_module")?;

    if source_module.is_empty() {
        return Err("source_module cannot be empty".to_string());
    }

    // correlation_id is optional
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation() {
        let envelope = EventEnvelope::new(
            "OrderCreated".to_string(),
            "orders".to_string(),
            json!({"order_id": 1}),
        );

        assert_eq!(envelope.event_type, "OrderCreated");
        assert_eq!(envelope.source_module, "orders");
        assert!(envelope.correlation_id.is_none());
    }

    #[test]
    fn test_envelope_with_builder() {
        let envelope = EventEnvelope::new(
            "OrderCreated".to_string(),
            "orders".to_string(),
            json!({"order_id": 1}),
        )
        .with_source_version("2.1.0".to_string())
        .with_correlation_id(Some("checkout-456".to_string()));

        assert_eq!(envelope.source_version, "2.1.0");
        assert_eq!(envelope.correlation_id, Some("checkout-456".to_string()));
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = EventEnvelope::new("OrderCreated".into(), "orders".into(), json!({}));
        let b = EventEnvelope::new("OrderCreated".into(), "orders".into(), json!({}));
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_serialized_envelope_passes_validation() {
        let envelope = EventEnvelope::new(
            "OrderCreated".to_string(),
            "orders".to_string(),
            json!({"order_id": 1}),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(validate_envelope_fields(&value).is_ok());
    }

    #[test]
    fn test_validate_envelope_fields_valid() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "event_type": "OrderCreated",
            "occurred_at": "2026-01-01T00:00:00Z",
            "source_module": "orders",
            "source_version": "1.0.0",
            "payload": {}
        });

        assert!(validate_envelope_fields(&envelope).is_ok());
    }

    #[test]
    fn test_validate_envelope_fields_missing_event_type() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "occurred_at": "2026-01-01T00:00:00Z",
            "source_module": "orders"
        });

        assert!(validate_envelope_fields(&envelope).is_err());
    }

    #[test]
    fn test_validate_envelope_fields_empty_source_module() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "event_type": "OrderCreated",
            "occurred_at": "2026-01-01T00:00:00Z",
            "source_module": ""
        });

        assert!(validate_envelope_fields(&envelope).is_err());
    }
}
