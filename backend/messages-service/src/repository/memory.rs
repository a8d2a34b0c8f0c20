//! In-process stores for tests and local runs without Postgres.
//!
//! Each store keeps its data behind a single lock, so every check-and-apply
//! step is one critical section, the same guarantee the unique constraint and
//! conditional UPDATE give in Postgres.

use super::{ConversationStore, MessageStore};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, MessageUpdate, ParticipantPair};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryConversationStore {
    by_pair_key: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.by_pair_key.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_pair_key.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(&self, pair: &ParticipantPair) -> AppResult<Conversation> {
        let mut conversations = self.by_pair_key.write().await;
        let conversation = conversations
            .entry(pair.key())
            .or_insert_with(|| Conversation::new(pair));
        Ok(conversation.clone())
    }

    async fn find(&self, pair: &ParticipantPair) -> AppResult<Option<Conversation>> {
        Ok(self.by_pair_key.read().await.get(&pair.key()).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    by_id: RwLock<HashMap<String, Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.by_id.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_id.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: &Message) -> AppResult<()> {
        let mut messages = self.by_id.write().await;
        if messages.contains_key(&message.id) {
            return Err(AppError::DuplicateKey(format!("message {}", message.id)));
        }
        messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> AppResult<Option<Message>> {
        Ok(self.by_id.read().await.get(id).cloned())
    }

    async fn versioned_update(
        &self,
        id: &str,
        update: &MessageUpdate,
        expected_version: i64,
    ) -> AppResult<Message> {
        let mut messages = self.by_id.write().await;
        let message = messages
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;

        if message.version != expected_version {
            return Err(AppError::VersionConflict {
                message_id: id.to_string(),
                expected: expected_version,
                actual: message.version,
            });
        }

        message.apply(update);
        Ok(message.clone())
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let messages = self.by_id.read().await;
        let mut matching: Vec<&Message> = messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let offset = usize::try_from(offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);

        Ok(matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use event_schema::EventType;

    fn message(id: &str, conversation_id: Uuid, offset_secs: i64) -> Message {
        let created_at = Utc::now() + Duration::seconds(offset_secs);
        Message {
            id: id.to_string(),
            conversation_id,
            content: format!("content {id}"),
            sender: "foo".into(),
            receiver: "bar".into(),
            status: "message.sent".into(),
            event_type: EventType::Create,
            read: false,
            sent: true,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    fn read_update() -> MessageUpdate {
        MessageUpdate {
            content: None,
            status: Some("message.read".into()),
            event_type: EventType::Update,
            read: true,
            created_at: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_order_independent() {
        let store = InMemoryConversationStore::new();
        let first = store
            .get_or_create(&ParticipantPair::new("foo", "bar"))
            .await
            .unwrap();
        let second = store
            .get_or_create(&ParticipantPair::new("bar", "foo"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.participants, ["foo".to_string(), "bar".to_string()]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_id() {
        let store = InMemoryMessageStore::new();
        let m = message("m1", Uuid::new_v4(), 0);

        store.append(&m).await.unwrap();
        let err = store.append(&m).await.unwrap_err();

        assert!(matches!(err, AppError::DuplicateKey(_)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_versioned_update_checks_version() {
        let store = InMemoryMessageStore::new();
        store.append(&message("m1", Uuid::new_v4(), 0)).await.unwrap();

        let updated = store.versioned_update("m1", &read_update(), 0).await.unwrap();
        assert_eq!(updated.version, 1);
        assert!(updated.read);

        let err = store
            .versioned_update("m1", &read_update(), 0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        assert_eq!(store.get_by_id("m1").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_versioned_update_missing_message() {
        let store = InMemoryMessageStore::new();
        let err = store
            .versioned_update("ghost", &read_update(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.get_by_id("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_page_orders_by_created_at() {
        let store = InMemoryMessageStore::new();
        let conversation_id = Uuid::new_v4();
        store.append(&message("late", conversation_id, 10)).await.unwrap();
        store.append(&message("early", conversation_id, -10)).await.unwrap();
        store.append(&message("other", Uuid::new_v4(), 0)).await.unwrap();

        let page = store.page(conversation_id, 0, 25).await.unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        assert!(store.page(conversation_id, 25, 25).await.unwrap().is_empty());
    }
}
