use crate::cache::{CacheKey, ConversationCache};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{Conversation, ParticipantPair};
use crate::repository::{ConversationStore, MessageStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fixed number of messages per page
pub const PAGE_SIZE: i64 = 25;

/// Read path for conversation history
///
/// Pages are 1-indexed; page `n` holds messages `[(n-1)*25, n*25)` in
/// CreatedAt order. Results are cached per participant pair and page with no
/// invalidation on writes, so a cached page may be stale.
#[derive(Clone)]
pub struct QueryService {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    cache: Option<Arc<dyn ConversationCache>>,
}

impl QueryService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        cache: Option<Arc<dyn ConversationCache>>,
    ) -> Self {
        Self {
            conversations,
            messages,
            cache,
        }
    }

    /// Offset of the first message on a 1-indexed page; pages below 1 count as 1
    pub fn page_offset(page: u32) -> i64 {
        (i64::from(page.max(1)) - 1) * PAGE_SIZE
    }

    /// Conversation for the pair, created when it does not exist yet
    ///
    /// This makes reads side-effecting: querying a pair that never exchanged a
    /// message persists an empty conversation.
    pub async fn ensure_conversation_exists(
        &self,
        pair: &ParticipantPair,
    ) -> AppResult<Conversation> {
        self.conversations.get_or_create(pair).await
    }

    /// One page of a conversation with its messages
    ///
    /// Calls [`QueryService::ensure_conversation_exists`] on a cache miss.
    pub async fn get_conversation_with_messages(
        &self,
        sender: &str,
        receiver: &str,
        page: u32,
    ) -> AppResult<Conversation> {
        let page = page.max(1);
        let pair = ParticipantPair::new(sender, receiver);
        let key = CacheKey::conversation_page(&pair, page);

        if let Some(cached) = self.cached(&key).await {
            return Ok(cached);
        }

        let conversation = self.ensure_conversation_exists(&pair).await?;
        let messages = self
            .messages
            .page(conversation.id, Self::page_offset(page), PAGE_SIZE)
            .await?;

        debug!(
            conversation_id = %conversation.id,
            page,
            count = messages.len(),
            "Loaded conversation page"
        );

        let conversation = conversation.with_messages(messages);
        self.store(&key, &conversation).await;
        Ok(conversation)
    }

    async fn cached(&self, key: &str) -> Option<Conversation> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(conversation)) => {
                metrics::record_cache_lookup("hit");
                Some(conversation)
            }
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                None
            }
            Err(err) => {
                metrics::record_cache_lookup("error");
                let err = AppError::from(err);
                warn!(key = %key, error = %err, "Cache read failed, falling back to store");
                None
            }
        }
    }

    async fn store(&self, key: &str, conversation: &Conversation) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if let Err(err) = cache.set(key, conversation).await {
            let err = AppError::from(err);
            warn!(key = %key, error = %err, "Cache write failed");
        }
    }
}
