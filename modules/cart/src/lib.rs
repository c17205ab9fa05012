pub mod config;
pub mod consumer;
pub mod contracts;
pub mod db;
pub mod health;
pub mod services;
pub mod validation;

pub use consumer::order_created_consumer::{start_order_created_consumer, OrderCreatedHandler};
