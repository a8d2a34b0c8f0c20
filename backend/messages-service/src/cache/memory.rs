use super::{CacheResult, ConversationCache};
use crate::models::Conversation;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local cache without expiry
#[derive(Default)]
pub struct InMemoryConversationCache {
    entries: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ConversationCache for InMemoryConversationCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Conversation>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, conversation: &Conversation) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), conversation.clone());
        Ok(())
    }
}
