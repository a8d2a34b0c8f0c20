use super::{unexpected_event, DeliveryHandler, HandlerOutcome};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{MessageUpdate, ParticipantPair};
use crate::repository::{ConversationStore, MessageStore};
use async_trait::async_trait;
use chrono::Utc;
use event_schema::{EventType, MessageEvent, MessageUpdated};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies status/content changes to existing messages with optimistic locking
///
/// When the producer states the version it saw, a mismatch is final and the
/// delivery fails. Without a stated version the handler reads the current
/// version itself, so a conflict only means another writer got in between; it
/// then re-reads and tries again a bounded number of times.
///
/// An unversioned update whose fields, `updatedAt` included, already match the
/// stored row is skipped. A write that landed after its store deadline fired is
/// therefore not applied a second time on redelivery.
pub struct MessageUpdatedHandler {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    conflict_retries: u32,
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl MessageUpdatedHandler {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        conflict_retries: u32,
    ) -> Self {
        Self {
            conversations,
            messages,
            conflict_retries,
        }
    }

    async fn apply(&self, event: &MessageUpdated) -> AppResult<HandlerOutcome> {
        let pair = ParticipantPair::new(event.sender.as_str(), event.receiver.as_str());
        let conversation = self
            .conversations
            .find(&pair)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("conversation {pair}")))?;

        let mut retries = 0;
        loop {
            let Some(existing) = self.messages.get_by_id(&event.id).await? else {
                // The create may still be in flight on another queue
                debug!(message_id = %event.id, "Update for unknown message skipped");
                return Ok(HandlerOutcome::Skipped);
            };

            if existing.conversation_id != conversation.id {
                return Err(AppError::SchemaViolation(format!(
                    "message {} does not belong to conversation {}",
                    event.id, pair
                )));
            }

            let update = MessageUpdate {
                content: non_empty(&event.content),
                status: non_empty(&event.status),
                event_type: EventType::Update,
                read: existing.read || event.marks_read(),
                created_at: event.created_at,
                updated_at: event.updated_at.unwrap_or_else(Utc::now),
            };

            if event.expected_version.is_none() && update.is_applied_to(&existing) {
                debug!(
                    message_id = %event.id,
                    version = existing.version,
                    "Update already applied, skipping"
                );
                return Ok(HandlerOutcome::Skipped);
            }

            let expected_version = event.expected_version.unwrap_or(existing.version);

            match self
                .messages
                .versioned_update(&event.id, &update, expected_version)
                .await
            {
                Ok(updated) => {
                    info!(
                        message_id = %updated.id,
                        version = updated.version,
                        read = updated.read,
                        "Message updated"
                    );
                    return Ok(HandlerOutcome::Applied);
                }
                Err(AppError::VersionConflict { actual, .. })
                    if event.expected_version.is_none() && retries < self.conflict_retries =>
                {
                    retries += 1;
                    metrics::record_version_conflict();
                    debug!(
                        message_id = %event.id,
                        expected_version,
                        actual,
                        retries,
                        "Concurrent update, re-reading message"
                    );
                }
                Err(err @ AppError::VersionConflict { .. }) => {
                    metrics::record_version_conflict();
                    warn!(message_id = %event.id, error = %err, "Stale update rejected");
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for MessageUpdatedHandler {
    fn name(&self) -> &'static str {
        "message_updated"
    }

    async fn handle(&self, payload: &[u8]) -> AppResult<HandlerOutcome> {
        match MessageEvent::decode(payload)? {
            MessageEvent::Updated(event) => self.apply(&event).await,
            other => Err(unexpected_event(EventType::Update, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, Message};
    use crate::repository::{InMemoryConversationStore, InMemoryMessageStore};
    use event_schema::{MessageCreated, MessageEnvelope};

    struct Fixture {
        handler: MessageUpdatedHandler,
        messages: Arc<InMemoryMessageStore>,
        conversation: Conversation,
    }

    async fn fixture() -> Fixture {
        let conversations = Arc::new(InMemoryConversationStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let conversation = conversations
            .get_or_create(&ParticipantPair::new("foo", "bar"))
            .await
            .unwrap();

        let created = MessageCreated {
            id: "m1".into(),
            sender: "foo".into(),
            receiver: "bar".into(),
            content: "hi".into(),
            status: "message.sent".into(),
            read: false,
            sent: true,
            created_at: None,
            updated_at: None,
        };
        messages
            .append(&Message::from_created(&created, conversation.id))
            .await
            .unwrap();

        Fixture {
            handler: MessageUpdatedHandler::new(conversations, messages.clone(), 3),
            messages,
            conversation,
        }
    }

    fn update(status: &str) -> MessageEnvelope {
        MessageEnvelope::new(EventType::Update, "m1", "foo", "bar").with_status(status)
    }

    #[tokio::test]
    async fn test_read_update_with_version() {
        let f = fixture().await;
        let payload = update("message.read").with_version(0).to_bytes().unwrap();

        assert_eq!(f.handler.handle(&payload).await.unwrap(), HandlerOutcome::Applied);

        let stored = f.messages.get_by_id("m1").await.unwrap().unwrap();
        assert!(stored.read);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, "message.read");
        assert_eq!(stored.content, "hi");
        assert_eq!(stored.conversation_id, f.conversation.id);
    }

    #[tokio::test]
    async fn test_stale_explicit_version_conflicts() {
        let f = fixture().await;
        let payload = update("message.read").with_version(0).to_bytes().unwrap();

        f.handler.handle(&payload).await.unwrap();
        let before = f.messages.get_by_id("m1").await.unwrap().unwrap();

        let err = f.handler.handle(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(f.messages.get_by_id("m1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_without_version_uses_current() {
        let f = fixture().await;

        let delivered = update("message.delivered").to_bytes().unwrap();
        f.handler.handle(&delivered).await.unwrap();
        f.handler.handle(&delivered).await.unwrap();

        let stored = f.messages.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert!(!stored.read);
    }

    #[tokio::test]
    async fn test_repeat_of_landed_update_is_skipped() {
        let f = fixture().await;
        let payload = update("message.read")
            .with_updated_at(Utc::now())
            .to_bytes()
            .unwrap();

        assert_eq!(f.handler.handle(&payload).await.unwrap(), HandlerOutcome::Applied);
        assert_eq!(f.handler.handle(&payload).await.unwrap(), HandlerOutcome::Skipped);

        let stored = f.messages.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(stored.read);
    }

    #[tokio::test]
    async fn test_read_does_not_regress() {
        let f = fixture().await;

        f.handler
            .handle(&update("message.read").to_bytes().unwrap())
            .await
            .unwrap();
        f.handler
            .handle(&update("message.delivered").to_bytes().unwrap())
            .await
            .unwrap();

        let stored = f.messages.get_by_id("m1").await.unwrap().unwrap();
        assert!(stored.read);
        assert_eq!(stored.status, "message.delivered");
    }

    #[tokio::test]
    async fn test_unknown_message_is_skipped() {
        let f = fixture().await;
        let payload = MessageEnvelope::new(EventType::Update, "ghost", "foo", "bar")
            .with_status("message.read")
            .to_bytes()
            .unwrap();

        assert_eq!(f.handler.handle(&payload).await.unwrap(), HandlerOutcome::Skipped);
        assert!(f.messages.get_by_id("ghost").await.unwrap().is_none());
        assert_eq!(f.messages.get_by_id("m1").await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_unknown_conversation_fails() {
        let f = fixture().await;
        let payload = MessageEnvelope::new(EventType::Update, "m1", "foo", "baz")
            .to_bytes()
            .unwrap();

        let err = f.handler.handle(&payload).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_payload_is_schema_violation() {
        let f = fixture().await;
        let payload = MessageEnvelope::new(EventType::Create, "m2", "foo", "bar")
            .to_bytes()
            .unwrap();

        match f.handler.handle(&payload).await.unwrap_err() {
            AppError::SchemaViolation(msg) => {
                assert_eq!(msg, "expected update event, got create for message m2")
            }
            other => panic!("expected schema violation, got {:?}", other),
        }
    }
}
