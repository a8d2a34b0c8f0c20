//! Shared fixtures for messages-service integration tests
#![allow(dead_code)]

use delivery_attempts::InMemoryAttemptLedger;
use event_schema::topology::{HandlerKind, QueueBinding, QUEUE_BINDINGS};
use event_schema::{EventType, MessageEnvelope};
use messages_service::broker::{DeliverySource, InMemoryBroker, InMemoryQueue};
use messages_service::consumers::{BrokerConsumer, Disposition, RetryPolicy};
use messages_service::handlers::{DeliveryHandler, MessageCreatedHandler, MessageUpdatedHandler};
use messages_service::repository::{InMemoryConversationStore, InMemoryMessageStore};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy with millisecond backoff so requeue loops finish quickly
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        max_transient_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
    }
}

pub fn create_payload(id: &str, sender: &str, receiver: &str, content: &str) -> Vec<u8> {
    MessageEnvelope::new(EventType::Create, id, sender, receiver)
        .with_content(content)
        .with_status("message.sent")
        .to_bytes()
        .unwrap()
}

pub fn update_payload(id: &str, sender: &str, receiver: &str, status: &str) -> MessageEnvelope {
    MessageEnvelope::new(EventType::Update, id, sender, receiver).with_status(status)
}

pub struct Lane {
    pub binding: QueueBinding,
    pub queue: Arc<InMemoryQueue>,
    pub consumer: BrokerConsumer,
}

/// Every production queue wired to in-memory stores, driven one delivery at a time
pub struct Pipeline {
    pub broker: InMemoryBroker,
    pub conversations: Arc<InMemoryConversationStore>,
    pub messages: Arc<InMemoryMessageStore>,
    pub ledger: Arc<InMemoryAttemptLedger>,
    pub lanes: Vec<Lane>,
}

impl Pipeline {
    pub async fn new() -> Self {
        let broker = InMemoryBroker::new();
        let conversations = Arc::new(InMemoryConversationStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let ledger = Arc::new(InMemoryAttemptLedger::new());

        let mut lanes = Vec::new();
        for binding in QUEUE_BINDINGS {
            let queue = Arc::new(broker.declare_queue(binding.queue).await);
            let handler: Arc<dyn DeliveryHandler> = match binding.handler {
                HandlerKind::Created => Arc::new(MessageCreatedHandler::new(
                    conversations.clone(),
                    messages.clone(),
                )),
                HandlerKind::Updated => Arc::new(MessageUpdatedHandler::new(
                    conversations.clone(),
                    messages.clone(),
                    3,
                )),
            };
            let consumer = BrokerConsumer::new(
                binding,
                queue.clone(),
                handler,
                ledger.clone(),
                Arc::new(broker.clone()),
                fast_policy(),
            );
            lanes.push(Lane {
                binding,
                queue,
                consumer,
            });
        }

        Self {
            broker,
            conversations,
            messages,
            ledger,
            lanes,
        }
    }

    /// Process everything that is ready on every queue, requeues included
    pub async fn drain(&self) -> Vec<(&'static str, Disposition)> {
        let mut settled = Vec::new();
        for _ in 0..1000 {
            let mut progressed = false;
            for lane in &self.lanes {
                if self.broker.ready_len(lane.binding.queue).await == 0 {
                    continue;
                }
                let delivery = lane.queue.next().await.unwrap().unwrap();
                settled.push((lane.binding.queue, lane.consumer.process(delivery).await));
                progressed = true;
            }
            if !progressed {
                return settled;
            }
        }
        panic!("queues did not drain");
    }
}

/// Dispositions recorded for one queue, in order
pub fn for_queue(settled: &[(&'static str, Disposition)], queue: &str) -> Vec<Disposition> {
    settled
        .iter()
        .filter(|(q, _)| *q == queue)
        .map(|(_, d)| d.clone())
        .collect()
}
