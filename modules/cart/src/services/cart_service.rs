//! Cart clearing service
//!
//! The consumer's only side effect. Clearing is atomic per cart: a single
//! DELETE removes every line item or none, so a redelivered event can
//! never observe a half-cleared cart.

use async_trait::async_trait;
use sqlx::PgPool;

/// Errors from the cart store
#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Store owning cart line items
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Remove all line items for a cart, returning how many were removed
    ///
    /// Zero removed items is success, not an error: the cart was already
    /// cleared or never populated, which is a valid terminal state.
    async fn clear_cart(&self, cart_id: &str) -> Result<u64, CartError>;
}

/// Postgres-backed cart store
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn clear_cart(&self, cart_id: &str) -> Result<u64, CartError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
