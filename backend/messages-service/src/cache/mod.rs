//! Best-effort cache for conversation pages
//!
//! Entries are never invalidated on writes, so a cached page can lag behind
//! the store until it expires. Callers treat every cache error as a miss.

use crate::models::{Conversation, ParticipantPair};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod memory;
mod redis_cache;

pub use memory::InMemoryConversationCache;
pub use redis_cache::{RedisConversationCache, SharedRedis};

/// Cache schema version - increment when changing key formats or payloads
pub const CACHE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// One page of a conversation
    /// Format: v1:queries:conversation:{pair_key}:page:{page}
    pub fn conversation_page(pair: &ParticipantPair, page: u32) -> String {
        format!(
            "v{}:queries:conversation:{}:page:{}",
            CACHE_VERSION,
            pair.key(),
            page
        )
    }
}

#[async_trait]
pub trait ConversationCache: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Conversation>>;

    async fn set(&self, key: &str, conversation: &Conversation) -> CacheResult<()>;
}
