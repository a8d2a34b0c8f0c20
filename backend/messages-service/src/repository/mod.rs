//! Conversation and message persistence
//!
//! The stores are the source of truth. Consistency rules live here and are
//! enforced by storage: one conversation per unordered participant pair, one
//! message per producer id, and version checked updates.

use crate::error::AppResult;
use crate::models::{Conversation, Message, MessageUpdate, ParticipantPair};
use async_trait::async_trait;
use uuid::Uuid;

pub mod deadline;
pub mod memory;
pub mod postgres;

pub use deadline::{TimedConversationStore, TimedMessageStore};
pub use memory::{InMemoryConversationStore, InMemoryMessageStore};
pub use postgres::{PgConversationStore, PgMessageStore};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Return the conversation for the pair, creating it if absent
    ///
    /// Concurrent callers for the same pair (in either order) observe the
    /// same conversation id.
    async fn get_or_create(&self, pair: &ParticipantPair) -> AppResult<Conversation>;

    async fn find(&self, pair: &ParticipantPair) -> AppResult<Option<Conversation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new message; `AppError::DuplicateKey` if the id exists
    async fn append(&self, message: &Message) -> AppResult<()>;

    /// Point lookup; an unknown id is `Ok(None)`
    async fn get_by_id(&self, id: &str) -> AppResult<Option<Message>>;

    /// Apply `update` only if the stored version equals `expected_version`
    ///
    /// On success the stored version becomes `expected_version + 1` and the
    /// updated message is returned. Errors with `NotFound` when the message
    /// is absent and `VersionConflict` when the version moved, in both cases
    /// without changing anything.
    async fn versioned_update(
        &self,
        id: &str,
        update: &MessageUpdate,
        expected_version: i64,
    ) -> AppResult<Message>;

    /// Messages of a conversation ordered by CreatedAt ascending (ties by id)
    async fn page(&self, conversation_id: Uuid, offset: i64, limit: i64)
        -> AppResult<Vec<Message>>;
}
