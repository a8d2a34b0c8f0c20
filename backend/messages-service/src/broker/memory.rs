//! In-process broker with queue semantics close to the production broker:
//! fanout exchange, manual acknowledgement, requeue at the head of the queue.

use super::{DeadLetter, DeadLetterSink, Delivery, DeliverySource, DeliveryTag};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    unacked: HashMap<u64, Delivery>,
    closed: bool,
}

#[derive(Default)]
struct BrokerInner {
    queues: Mutex<HashMap<String, QueueState>>,
    notifiers: Mutex<HashMap<String, Arc<Notify>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    next_tag: AtomicU64,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a queue bound to the exchange; declaring twice is a no-op
    pub async fn declare_queue(&self, queue: &str) -> InMemoryQueue {
        self.inner
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        let notify = self
            .inner
            .notifiers
            .lock()
            .await
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone();

        InMemoryQueue {
            broker: self.clone(),
            queue: queue.to_string(),
            notify,
        }
    }

    /// Publish to the exchange; every declared queue receives a copy
    pub async fn publish(&self, routing_key: Option<&str>, payload: &[u8]) {
        let mut queues = self.inner.queues.lock().await;
        let notifiers = self.inner.notifiers.lock().await;

        for (name, state) in queues.iter_mut() {
            let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
            state.ready.push_back(Delivery {
                queue: name.clone(),
                routing_key: routing_key.map(str::to_string),
                payload: payload.to_vec(),
                redelivered: false,
                tag: DeliveryTag::Memory(tag),
            });
            if let Some(notify) = notifiers.get(name) {
                notify.notify_one();
            }
        }
    }

    /// Close every queue; consumers drain what is ready and then stop
    pub async fn close(&self) {
        let mut queues = self.inner.queues.lock().await;
        for state in queues.values_mut() {
            state.closed = true;
        }
        for notify in self.inner.notifiers.lock().await.values() {
            notify.notify_one();
        }
    }

    pub async fn ready_len(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |state| state.ready.len())
    }

    pub async fn unacked_len(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .await
            .get(queue)
            .map_or(0, |state| state.unacked.len())
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryBroker {
    async fn dead_letter(&self, letter: &DeadLetter) -> AppResult<()> {
        self.inner.dead_letters.lock().await.push(letter.clone());
        Ok(())
    }
}

/// Consumer handle for one queue of an [`InMemoryBroker`]
pub struct InMemoryQueue {
    broker: InMemoryBroker,
    queue: String,
    notify: Arc<Notify>,
}

impl InMemoryQueue {
    fn memory_tag(delivery: &Delivery) -> AppResult<u64> {
        match delivery.tag {
            DeliveryTag::Memory(tag) => Ok(tag),
            ref other => Err(AppError::Broker(format!(
                "foreign delivery tag {:?} on in-memory queue",
                other
            ))),
        }
    }
}

#[async_trait]
impl DeliverySource for InMemoryQueue {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next(&self) -> AppResult<Option<Delivery>> {
        loop {
            {
                let mut queues = self.broker.inner.queues.lock().await;
                let state = queues
                    .get_mut(&self.queue)
                    .ok_or_else(|| AppError::Broker(format!("queue {} not declared", self.queue)))?;

                if let Some(delivery) = state.ready.pop_front() {
                    if let DeliveryTag::Memory(tag) = delivery.tag {
                        state.unacked.insert(tag, delivery.clone());
                    }
                    return Ok(Some(delivery));
                }

                if state.closed {
                    return Ok(None);
                }
            }

            // notify_one leaves a permit when nobody waits, so a publish between
            // the check above and this await is not lost
            self.notify.notified().await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        let tag = Self::memory_tag(delivery)?;
        let mut queues = self.broker.inner.queues.lock().await;
        let state = queues
            .get_mut(&self.queue)
            .ok_or_else(|| AppError::Broker(format!("queue {} not declared", self.queue)))?;

        state
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| AppError::Broker(format!("unknown delivery tag {tag}")))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> AppResult<()> {
        let tag = Self::memory_tag(delivery)?;
        let mut queues = self.broker.inner.queues.lock().await;
        let state = queues
            .get_mut(&self.queue)
            .ok_or_else(|| AppError::Broker(format!("queue {} not declared", self.queue)))?;

        let mut delivery = state
            .unacked
            .remove(&tag)
            .ok_or_else(|| AppError::Broker(format!("unknown delivery tag {tag}")))?;

        if requeue {
            delivery.redelivered = true;
            state.ready.push_front(delivery);
            self.notify.notify_one();
        }
        Ok(())
    }
}
