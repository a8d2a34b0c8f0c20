//! Deadline wrappers for store calls
//!
//! Every call is raced against a fixed timeout; expiry surfaces as
//! `AppError::TransientStore` so a consumer retries the delivery later.

use super::{ConversationStore, MessageStore};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, MessageUpdate, ParticipantPair};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

/// Execute a store future with a deadline
pub async fn with_deadline<F, T>(
    duration: Duration,
    operation: &'static str,
    future: F,
) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = duration.as_millis() as u64, "Store call timed out");
            Err(AppError::TransientStore(format!(
                "{operation} timed out after {duration:?}"
            )))
        }
    }
}

#[derive(Clone)]
pub struct TimedConversationStore {
    inner: Arc<dyn ConversationStore>,
    timeout: Duration,
}

impl TimedConversationStore {
    pub fn new(inner: Arc<dyn ConversationStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ConversationStore for TimedConversationStore {
    async fn get_or_create(&self, pair: &ParticipantPair) -> AppResult<Conversation> {
        with_deadline(
            self.timeout,
            "conversation.get_or_create",
            self.inner.get_or_create(pair),
        )
        .await
    }

    async fn find(&self, pair: &ParticipantPair) -> AppResult<Option<Conversation>> {
        with_deadline(self.timeout, "conversation.find", self.inner.find(pair)).await
    }
}

#[derive(Clone)]
pub struct TimedMessageStore {
    inner: Arc<dyn MessageStore>,
    timeout: Duration,
}

impl TimedMessageStore {
    pub fn new(inner: Arc<dyn MessageStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl MessageStore for TimedMessageStore {
    async fn append(&self, message: &Message) -> AppResult<()> {
        with_deadline(self.timeout, "message.append", self.inner.append(message)).await
    }

    async fn get_by_id(&self, id: &str) -> AppResult<Option<Message>> {
        with_deadline(self.timeout, "message.get_by_id", self.inner.get_by_id(id)).await
    }

    /// An expired deadline does not recall a statement already sent, so the
    /// update may still commit after this returns `TransientStore`.
    async fn versioned_update(
        &self,
        id: &str,
        update: &MessageUpdate,
        expected_version: i64,
    ) -> AppResult<Message> {
        with_deadline(
            self.timeout,
            "message.versioned_update",
            self.inner.versioned_update(id, update, expected_version),
        )
        .await
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        with_deadline(
            self.timeout,
            "message.page",
            self.inner.page(conversation_id, offset, limit),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryMessageStore;
    use chrono::Utc;
    use event_schema::{EventType, MessageCreated};

    struct SlowConversations;

    /// Commits the update, then stalls before answering
    struct LateAck {
        inner: InMemoryMessageStore,
    }

    #[async_trait]
    impl MessageStore for LateAck {
        async fn append(&self, message: &Message) -> AppResult<()> {
            self.inner.append(message).await
        }

        async fn get_by_id(&self, id: &str) -> AppResult<Option<Message>> {
            self.inner.get_by_id(id).await
        }

        async fn versioned_update(
            &self,
            id: &str,
            update: &MessageUpdate,
            expected_version: i64,
        ) -> AppResult<Message> {
            let updated = self.inner.versioned_update(id, update, expected_version).await?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(updated)
        }

        async fn page(
            &self,
            conversation_id: Uuid,
            offset: i64,
            limit: i64,
        ) -> AppResult<Vec<Message>> {
            self.inner.page(conversation_id, offset, limit).await
        }
    }

    #[async_trait]
    impl ConversationStore for SlowConversations {
        async fn get_or_create(&self, pair: &ParticipantPair) -> AppResult<Conversation> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Conversation::new(pair))
        }

        async fn find(&self, _pair: &ParticipantPair) -> AppResult<Option<Conversation>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_deadline_success() {
        let result = with_deadline(Duration::from_secs(1), "op", async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_deadline_passes_inner_error_through() {
        let result: AppResult<()> = with_deadline(Duration::from_secs(1), "op", async {
            Err(AppError::DuplicateKey("messages_pkey".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn test_timed_store_expiry_is_transient() {
        let store =
            TimedConversationStore::new(Arc::new(SlowConversations), Duration::from_millis(10));

        let err = store
            .get_or_create(&ParticipantPair::new("foo", "bar"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TransientStore(_)));
        assert!(err.is_retryable());

        assert!(store.find(&ParticipantPair::new("foo", "bar")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_may_land_after_timeout() {
        let inner = Arc::new(LateAck {
            inner: InMemoryMessageStore::new(),
        });
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
        inner
            .append(&Message::from_created(&created, Uuid::new_v4()))
            .await
            .unwrap();

        let store = TimedMessageStore::new(inner.clone(), Duration::from_millis(10));
        let update = MessageUpdate {
            content: None,
            status: Some("message.read".into()),
            event_type: EventType::Update,
            read: true,
            created_at: None,
            updated_at: Utc::now(),
        };

        let err = store.versioned_update("m1", &update, 0).await.unwrap_err();
        assert!(matches!(err, AppError::TransientStore(_)));

        let stored = inner.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(update.is_applied_to(&stored));
    }
}
