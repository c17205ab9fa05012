pub mod config;
pub mod contracts;
pub mod db;
pub mod health;
pub mod publisher;
pub mod repos;

pub use publisher::{notify_order_created, start_outbox_publisher};
