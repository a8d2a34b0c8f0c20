//! Queue consumers
//!
//! One [`BrokerConsumer`] per queue, each a strictly sequential loop:
//! take a delivery, run the handler to completion, then settle it. Settling
//! never happens before the handler returns, and a requested shutdown only
//! stops the loop from taking the next delivery.

use crate::broker::{DeadLetter, DeadLetterSink, Delivery, DeliverySource};
use crate::config::ConsumerConfig;
use crate::error::AppError;
use crate::handlers::{DeliveryHandler, HandlerOutcome};
use crate::metrics;
use delivery_attempts::{AttemptKey, AttemptLedger};
use event_schema::QueueBinding;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause after a failed `next()` before polling the source again
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Failures of a permanent kind before a delivery is dead-lettered
    pub max_attempts: u32,
    /// Failures of a retryable kind before a delivery is dead-lettered
    pub max_transient_attempts: u32,
    /// Delay before requeueing after a retryable failure, doubled per attempt
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            max_transient_attempts: config.max_transient_attempts,
            backoff_base: config.retry_backoff,
            backoff_max: Duration::from_secs(5),
        }
    }

    pub fn limit_for(&self, err: &AppError) -> u32 {
        if err.is_retryable() {
            self.max_transient_attempts
        } else {
            self.max_attempts
        }
    }

    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ConsumerConfig::default())
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded, delivery acked
    Acked(HandlerOutcome),
    /// Routing key belongs to another queue, acked without handling
    Filtered,
    /// Handler failed, delivery requeued
    Requeued { attempts: u32 },
    /// Attempt budget exhausted, delivery published to the dead-letter sink and acked
    DeadLettered { attempts: u32 },
}

impl Disposition {
    fn label(&self) -> &'static str {
        match self {
            Disposition::Acked(outcome) => outcome.as_str(),
            Disposition::Filtered => "filtered",
            Disposition::Requeued { .. } => "requeued",
            Disposition::DeadLettered { .. } => "dead_lettered",
        }
    }
}

pub struct BrokerConsumer {
    binding: QueueBinding,
    source: Arc<dyn DeliverySource>,
    handler: Arc<dyn DeliveryHandler>,
    ledger: Arc<dyn AttemptLedger>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: RetryPolicy,
}

impl BrokerConsumer {
    pub fn new(
        binding: QueueBinding,
        source: Arc<dyn DeliverySource>,
        handler: Arc<dyn DeliveryHandler>,
        ledger: Arc<dyn AttemptLedger>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            binding,
            source,
            handler,
            ledger,
            dead_letters,
            policy,
        }
    }

    pub fn queue(&self) -> &str {
        self.binding.queue
    }

    /// Consume until shutdown is signalled or the source closes
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = self.binding.queue,
            routing_key = self.binding.routing_key,
            handler = self.handler.name(),
            "Starting consumer"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Only the wait for a delivery races the shutdown signal; processing
            // below runs to completion
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                next = self.source.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    self.process(delivery).await;
                }
                Ok(None) => {
                    info!(queue = self.binding.queue, "Delivery source closed");
                    break;
                }
                Err(err) => {
                    error!(queue = self.binding.queue, error = %err, "Failed to receive delivery");
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(SOURCE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(queue = self.binding.queue, "Consumer stopped");
    }

    /// Handle one delivery and settle it with the broker
    pub async fn process(&self, delivery: Delivery) -> Disposition {
        let disposition = self.dispatch(&delivery).await;
        metrics::record_delivery(self.binding.queue, disposition.label());
        disposition
    }

    async fn dispatch(&self, delivery: &Delivery) -> Disposition {
        if !self.binding.accepts(delivery.routing_key.as_deref()) {
            debug!(
                queue = self.binding.queue,
                routing_key = ?delivery.routing_key,
                "Delivery for another binding, acking without handling"
            );
            self.ack(delivery).await;
            return Disposition::Filtered;
        }

        let key = AttemptKey::for_delivery(&delivery.queue, &delivery.payload);

        match self.handler.handle(&delivery.payload).await {
            Ok(outcome) => {
                self.ack(delivery).await;
                if let Err(err) = self.ledger.clear(&key).await {
                    warn!(attempt_key = %key, error = %err, "Failed to clear delivery attempts");
                }
                Disposition::Acked(outcome)
            }
            Err(err) => self.on_failure(delivery, &key, err).await,
        }
    }

    async fn on_failure(
        &self,
        delivery: &Delivery,
        key: &AttemptKey,
        err: AppError,
    ) -> Disposition {
        let attempts = match self.ledger.record_failure(key, &err.to_string()).await {
            Ok(attempts) => attempts,
            Err(ledger_err) => {
                // Without a count there is no safe way to give up on the delivery
                warn!(
                    queue = self.binding.queue,
                    error = %err,
                    ledger_error = %ledger_err,
                    "Failed to record delivery attempt, requeueing"
                );
                tokio::time::sleep(self.policy.backoff(1)).await;
                self.nack(delivery).await;
                return Disposition::Requeued { attempts: 0 };
            }
        };

        let limit = self.policy.limit_for(&err);
        if attempts < limit {
            warn!(
                queue = self.binding.queue,
                attempts,
                limit,
                redelivered = delivery.redelivered,
                kind = err.label(),
                error = %err,
                "Delivery failed, requeueing"
            );
            if err.is_retryable() {
                tokio::time::sleep(self.policy.backoff(attempts)).await;
            }
            self.nack(delivery).await;
            return Disposition::Requeued { attempts };
        }

        let letter = DeadLetter {
            queue: delivery.queue.clone(),
            routing_key: delivery.routing_key.clone(),
            payload: delivery.payload.clone(),
            attempts,
            reason: err.label().to_string(),
            error: err.to_string(),
        };

        match self.dead_letters.dead_letter(&letter).await {
            Ok(()) => {
                error!(
                    queue = self.binding.queue,
                    attempts,
                    redelivered = delivery.redelivered,
                    kind = err.label(),
                    error = %err,
                    "Delivery exhausted its attempts and was dead-lettered"
                );
                metrics::record_dead_letter(self.binding.queue, err.label());
                self.ack(delivery).await;
                if let Err(clear_err) = self.ledger.clear(key).await {
                    warn!(
                        attempt_key = %key,
                        error = %clear_err,
                        "Failed to clear delivery attempts"
                    );
                }
                Disposition::DeadLettered { attempts }
            }
            Err(dlq_err) => {
                error!(
                    queue = self.binding.queue,
                    attempts,
                    error = %dlq_err,
                    "Dead-letter publish failed, requeueing"
                );
                self.nack(delivery).await;
                Disposition::Requeued { attempts }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(err) = self.source.ack(delivery).await {
            // The broker will hand the delivery out again; handlers are idempotent
            error!(queue = self.binding.queue, error = %err, "Failed to ack delivery");
        }
    }

    async fn nack(&self, delivery: &Delivery) {
        if let Err(err) = self.source.nack(delivery, true).await {
            error!(queue = self.binding.queue, error = %err, "Failed to nack delivery");
        }
    }
}

/// Periodically prune attempt rows of deliveries that stopped showing up
pub async fn run_attempt_cleanup(
    ledger: Arc<dyn AttemptLedger>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match ledger.cleanup_older_than(retention).await {
            Ok(deleted) if deleted > 0 => info!(deleted, "Pruned stale delivery attempts"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Delivery attempt cleanup failed"),
        }
    }
}

/// Background tasks that share one shutdown signal
pub struct ConsumerSet {
    tasks: JoinSet<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Default for ConsumerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerSet {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            shutdown_tx,
        }
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn_consumer(&mut self, consumer: BrokerConsumer) {
        let shutdown = self.shutdown_receiver();
        self.tasks.spawn(consumer.run(shutdown));
    }

    pub fn spawn_task<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown_receiver();
        self.tasks.spawn(task(shutdown));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal shutdown and wait up to `grace` for in-flight work to finish
    ///
    /// Returns `false` if tasks had to be aborted. Deliveries a task held when
    /// it was aborted were never acked and will be redelivered.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);

        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(err) = result {
                    error!(error = %err, "Consumer task panicked");
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                remaining = self.tasks.len(),
                grace_secs = grace.as_secs(),
                "Consumers did not stop within the grace period, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        drained
    }
}
