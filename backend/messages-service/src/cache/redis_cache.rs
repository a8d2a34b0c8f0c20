use super::{CacheError, CacheResult, ConversationCache};
use crate::models::Conversation;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Shared Redis connection manager
pub type SharedRedis = Arc<Mutex<ConnectionManager>>;

#[derive(Clone)]
pub struct RedisConversationCache {
    redis: SharedRedis,
    /// Zero disables expiry
    ttl: Duration,
    timeout: Duration,
}

impl RedisConversationCache {
    pub fn new(redis: SharedRedis, ttl: Duration, timeout: Duration) -> Self {
        Self {
            redis,
            ttl,
            timeout,
        }
    }

    pub async fn connect(url: &str, ttl: Duration, op_timeout: Duration) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let manager = timeout(op_timeout * 20, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(op_timeout * 20))??;
        Ok(Self::new(Arc::new(Mutex::new(manager)), ttl, op_timeout))
    }

    async fn connection(&self) -> ConnectionManager {
        self.redis.lock().await.clone()
    }
}

#[async_trait]
impl ConversationCache for RedisConversationCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Conversation>> {
        let mut conn = self.connection().await;

        let data = timeout(self.timeout, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))??;

        match data {
            Some(data) => {
                debug!(key = %key, "Cache hit");
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, conversation: &Conversation) -> CacheResult<()> {
        let data = serde_json::to_string(conversation)?;
        let mut conn = self.connection().await;

        let write = async {
            if self.ttl.is_zero() {
                conn.set::<_, _, ()>(key, data).await
            } else {
                conn.set_ex::<_, _, ()>(key, data, self.ttl.as_secs().max(1)).await
            }
        };

        timeout(self.timeout, write)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))??;

        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "Cache set");
        Ok(())
    }
}
