//! Kafka transport for message events
//!
//! The exchange maps to one topic and each queue to a consumer group, so every
//! queue sees every record (fanout). The routing key travels in the
//! `event_type` header. Offsets are committed manually: ack commits past the
//! record, a requeueing nack seeks the partition back to it.

use super::{DeadLetter, DeadLetterSink, Delivery, DeliverySource, DeliveryTag};
use crate::config::KafkaConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use event_schema::topology::ROUTING_KEY_HEADER;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(30);

fn header_value<'a>(message: &'a BorrowedMessage<'a>, key: &str) -> Option<&'a str> {
    message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == key)
                .and_then(|header| header.value)
        })
        .and_then(|value| std::str::from_utf8(value).ok())
}

pub struct KafkaDeliverySource {
    consumer: StreamConsumer,
    queue: String,
}

impl KafkaDeliverySource {
    pub fn new(config: &KafkaConfig, queue: &str) -> AppResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", queue)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create()?;

        consumer.subscribe(&[&config.topic])?;

        info!(
            topic = %config.topic,
            queue = %queue,
            "Kafka delivery source subscribed"
        );

        Ok(Self {
            consumer,
            queue: queue.to_string(),
        })
    }

    fn kafka_tag(delivery: &Delivery) -> AppResult<(&str, i32, i64)> {
        match &delivery.tag {
            DeliveryTag::Kafka {
                topic,
                partition,
                offset,
            } => Ok((topic.as_str(), *partition, *offset)),
            other => Err(AppError::Broker(format!(
                "foreign delivery tag {:?} on Kafka source",
                other
            ))),
        }
    }
}

#[async_trait]
impl DeliverySource for KafkaDeliverySource {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next(&self) -> AppResult<Option<Delivery>> {
        let record = self.consumer.recv().await?;

        let payload = match record.payload() {
            Some(payload) => payload.to_vec(),
            None => {
                debug!(
                    topic = record.topic(),
                    offset = record.offset(),
                    "Record with empty payload"
                );
                Vec::new()
            }
        };

        Ok(Some(Delivery {
            queue: self.queue.clone(),
            routing_key: header_value(&record, ROUTING_KEY_HEADER).map(str::to_string),
            payload,
            redelivered: false,
            tag: DeliveryTag::Kafka {
                topic: record.topic().to_string(),
                partition: record.partition(),
                offset: record.offset(),
            },
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        let (topic, partition, offset) = Self::kafka_tag(delivery)?;

        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.commit(&offsets, CommitMode::Async)?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> AppResult<()> {
        if !requeue {
            return self.ack(delivery).await;
        }

        let (topic, partition, offset) = Self::kafka_tag(delivery)?;
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
            .map_err(|e| {
                warn!(topic, partition, offset, error = %e, "Failed to seek back for redelivery");
                AppError::from(e)
            })
    }
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(config: &KafkaConfig) -> AppResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "30000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()?;

        Ok(Self {
            producer,
            topic: config.dlq_topic.clone(),
        })
    }
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn dead_letter(&self, letter: &DeadLetter) -> AppResult<()> {
        let attempts = letter.attempts.to_string();

        let mut headers = OwnedHeaders::new()
            .insert(Header {
                key: "queue",
                value: Some(letter.queue.as_bytes()),
            })
            .insert(Header {
                key: "attempts",
                value: Some(attempts.as_bytes()),
            })
            .insert(Header {
                key: "reason",
                value: Some(letter.reason.as_bytes()),
            })
            .insert(Header {
                key: "error",
                value: Some(letter.error.as_bytes()),
            });

        if let Some(routing_key) = &letter.routing_key {
            headers = headers.insert(Header {
                key: ROUTING_KEY_HEADER,
                value: Some(routing_key.as_bytes()),
            });
        }

        let record = FutureRecord::to(&self.topic)
            .key(&letter.queue)
            .payload(&letter.payload)
            .headers(headers);

        self.producer
            .send(record, PRODUCE_TIMEOUT)
            .await
            .map_err(|(err, _)| AppError::Broker(format!("dead-letter publish failed: {}", err)))?;

        info!(
            topic = %self.topic,
            queue = %letter.queue,
            attempts = letter.attempts,
            reason = %letter.reason,
            "Delivery dead-lettered"
        );

        Ok(())
    }
}
