use super::{unexpected_event, DeliveryHandler, HandlerOutcome};
use crate::error::{AppError, AppResult};
use crate::models::{Message, ParticipantPair};
use crate::repository::{ConversationStore, MessageStore};
use async_trait::async_trait;
use event_schema::{EventType, MessageEvent};
use std::sync::Arc;
use tracing::{debug, info};

/// Appends newly sent messages to their conversation
pub struct MessageCreatedHandler {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
}

impl MessageCreatedHandler {
    pub fn new(conversations: Arc<dyn ConversationStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            conversations,
            messages,
        }
    }
}

#[async_trait]
impl DeliveryHandler for MessageCreatedHandler {
    fn name(&self) -> &'static str {
        "message_created"
    }

    async fn handle(&self, payload: &[u8]) -> AppResult<HandlerOutcome> {
        let event = match MessageEvent::decode(payload)? {
            MessageEvent::Created(event) => event,
            other => return Err(unexpected_event(EventType::Create, &other)),
        };

        let pair = ParticipantPair::new(event.sender.as_str(), event.receiver.as_str());
        let conversation = self.conversations.get_or_create(&pair).await?;
        let message = Message::from_created(&event, conversation.id);

        match self.messages.append(&message).await {
            Ok(()) => {
                info!(
                    message_id = %message.id,
                    conversation_id = %conversation.id,
                    "Message appended"
                );
                Ok(HandlerOutcome::Applied)
            }
            // A redelivered create already landed; nothing left to do
            Err(AppError::DuplicateKey(_)) => {
                debug!(message_id = %message.id, "Message already stored");
                Ok(HandlerOutcome::AlreadyApplied)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryConversationStore, InMemoryMessageStore};
    use event_schema::{EventType, MessageEnvelope};

    fn handler() -> (
        MessageCreatedHandler,
        Arc<InMemoryConversationStore>,
        Arc<InMemoryMessageStore>,
    ) {
        let conversations = Arc::new(InMemoryConversationStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        (
            MessageCreatedHandler::new(conversations.clone(), messages.clone()),
            conversations,
            messages,
        )
    }

    fn create(id: &str, sender: &str, receiver: &str) -> Vec<u8> {
        MessageEnvelope::new(EventType::Create, id, sender, receiver)
            .with_content("hi")
            .with_status("message.sent")
            .to_bytes()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_appends_message() {
        let (handler, conversations, messages) = handler();

        let outcome = handler.handle(&create("m1", "foo", "bar")).await.unwrap();
        assert_eq!(outcome, HandlerOutcome::Applied);

        let conversation = conversations
            .find(&ParticipantPair::new("foo", "bar"))
            .await
            .unwrap()
            .expect("conversation created");
        let stored = messages.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(stored.conversation_id, conversation.id);
        assert_eq!(stored.version, 0);
        assert_eq!(stored.content, "hi");
    }

    #[tokio::test]
    async fn test_redelivered_create_is_absorbed() {
        let (handler, _, messages) = handler();
        let payload = create("m1", "foo", "bar");

        assert_eq!(handler.handle(&payload).await.unwrap(), HandlerOutcome::Applied);
        assert_eq!(
            handler.handle(&payload).await.unwrap(),
            HandlerOutcome::AlreadyApplied
        );
        assert_eq!(messages.len().await, 1);
    }

    #[tokio::test]
    async fn test_reply_reuses_conversation() {
        let (handler, conversations, _) = handler();

        handler.handle(&create("m1", "foo", "bar")).await.unwrap();
        handler.handle(&create("m2", "bar", "foo")).await.unwrap();

        assert_eq!(conversations.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_payload_is_schema_violation() {
        let (handler, conversations, _) = handler();
        let payload = MessageEnvelope::new(EventType::Update, "m1", "foo", "bar")
            .to_bytes()
            .unwrap();

        match handler.handle(&payload).await.unwrap_err() {
            AppError::SchemaViolation(msg) => {
                assert_eq!(msg, "expected create event, got update for message m1")
            }
            other => panic!("expected schema violation, got {:?}", other),
        }
        assert!(conversations.is_empty().await);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_schema_violation() {
        let (handler, _, _) = handler();
        let err = handler.handle(b"not json").await.unwrap_err();
        assert!(matches!(err, AppError::SchemaViolation(_)));
    }
}
