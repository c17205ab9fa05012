pub mod order_created_v1;

pub use order_created_v1::{OrderCreatedV1, OrderItemV1, ORDER_CREATED_SUBJECT};
