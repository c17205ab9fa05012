pub mod order_created_consumer;
