use super::{ConversationStore, MessageStore};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, MessageUpdate, ParticipantPair};
use async_trait::async_trait;
use event_schema::EventType;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_id, content, sender, receiver, status, event_type, \
     read, sent, created_at, updated_at, version";

fn conversation_from_row(row: &PgRow) -> AppResult<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        participants: [row.try_get("participant_a")?, row.try_get("participant_b")?],
        pair_key: row.try_get("pair_key")?,
        messages: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> AppResult<Message> {
    let event_type: String = row.try_get("event_type")?;
    let event_type: EventType = event_type
        .parse()
        .map_err(|e: event_schema::SchemaError| AppError::Internal(e.to_string()))?;

    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        content: row.try_get("content")?,
        sender: row.try_get("sender")?,
        receiver: row.try_get("receiver")?,
        status: row.try_get("status")?,
        event_type,
        read: row.try_get("read")?,
        sent: row.try_get("sent")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get_or_create(&self, pair: &ParticipantPair) -> AppResult<Conversation> {
        let candidate = Conversation::new(pair);

        // The unique pair_key decides the winner when two writers race
        let inserted = sqlx::query(
            r#"
            INSERT INTO conversations
                (id, participant_a, participant_b, pair_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (pair_key) DO NOTHING
            "#,
        )
        .bind(candidate.id)
        .bind(&candidate.participants[0])
        .bind(&candidate.participants[1])
        .bind(&candidate.pair_key)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            debug!(conversation_id = %candidate.id, pair = %pair, "Created conversation");
            return Ok(candidate);
        }

        let row = sqlx::query(
            r#"
            SELECT id, participant_a, participant_b, pair_key, created_at, updated_at
            FROM conversations
            WHERE pair_key = $1
            "#,
        )
        .bind(&candidate.pair_key)
        .fetch_one(&self.pool)
        .await?;

        conversation_from_row(&row)
    }

    async fn find(&self, pair: &ParticipantPair) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, participant_a, participant_b, pair_key, created_at, updated_at
            FROM conversations
            WHERE pair_key = $1
            "#,
        )
        .bind(pair.key())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: &Message) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, content, sender, receiver, status,
                                  event_type, read, sent, created_at, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&message.id)
        .bind(message.conversation_id)
        .bind(&message.content)
        .bind(&message.sender)
        .bind(&message.receiver)
        .bind(&message.status)
        .bind(message.event_type.as_str())
        .bind(message.read)
        .bind(message.sent)
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        if row.is_none() {
            debug!(message_id = %id, "Message not found");
        }

        row.as_ref().map(message_from_row).transpose()
    }

    async fn versioned_update(
        &self,
        id: &str,
        update: &MessageUpdate,
        expected_version: i64,
    ) -> AppResult<Message> {
        // Check and apply in one statement so there is no read-then-write window
        let row = sqlx::query(&format!(
            r#"
            UPDATE messages
            SET content = COALESCE($2, content),
                status = COALESCE($3, status),
                event_type = $4,
                read = $5,
                created_at = COALESCE($6, created_at),
                updated_at = $7,
                version = version + 1
            WHERE id = $1 AND version = $8
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.content.as_deref())
        .bind(update.status.as_deref())
        .bind(update.event_type.as_str())
        .bind(update.read)
        .bind(update.created_at)
        .bind(update.updated_at)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return message_from_row(&row);
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match current {
            None => Err(AppError::NotFound(format!("message {id}"))),
            Some(actual) => Err(AppError::VersionConflict {
                message_id: id.to_string(),
                expected: expected_version,
                actual,
            }),
        }
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(conversation_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}
