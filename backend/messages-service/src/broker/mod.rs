//! Broker abstraction used by the consumers
//!
//! A [`DeliverySource`] hands out one delivery at a time from a single queue
//! and expects exactly one `ack` or `nack` for it. Nothing is acknowledged
//! implicitly.

use crate::error::AppResult;
use async_trait::async_trait;

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaDeadLetterSink, KafkaDeliverySource};
pub use memory::{InMemoryBroker, InMemoryQueue};

/// Adapter-specific handle needed to settle a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTag {
    Memory(u64),
    Kafka {
        topic: String,
        partition: i32,
        offset: i64,
    },
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    /// Routing key the producer published with, when the transport carries one
    pub routing_key: Option<String>,
    pub payload: Vec<u8>,
    /// Set when the broker knows this delivery was handed out before
    pub redelivered: bool,
    pub tag: DeliveryTag,
}

#[async_trait]
pub trait DeliverySource: Send + Sync {
    fn queue(&self) -> &str;

    /// Wait for the next delivery. `Ok(None)` means the source is closed.
    ///
    /// Must be cancel safe: dropping the future loses no delivery.
    async fn next(&self) -> AppResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> AppResult<()>;

    /// Reject a delivery; with `requeue` it is handed out again first
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> AppResult<()>;
}

/// Delivery that exhausted its attempt budget
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub queue: String,
    pub routing_key: Option<String>,
    pub payload: Vec<u8>,
    pub attempts: u32,
    /// Error label of the last failure, e.g. `schema_violation`
    pub reason: String,
    pub error: String,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: &DeadLetter) -> AppResult<()>;
}
