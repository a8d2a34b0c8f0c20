//! Event contract for chat message lifecycle events
//!
//! Producers publish a flat JSON envelope per message change. The `type` field
//! selects how the envelope is interpreted; decoding turns it into a
//! [`MessageEvent`] so consumers match on the variant instead of a string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod topology;

pub use topology::{HandlerKind, QueueBinding, QUEUE_BINDINGS};

/// Status values that mark a message as read
const READ_STATUSES: [&str; 2] = [topology::ROUTING_KEY_READ, "read"];

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Declared kind of change carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "create", alias = "message.create")]
    Create,
    #[serde(rename = "update", alias = "message.update")]
    Update,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "create",
            EventType::Update => "update",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" | "message.create" => Ok(EventType::Create),
            "update" | "message.update" => Ok(EventType::Update),
            other => Err(SchemaError::InvalidField {
                field: "type",
                reason: format!("unknown event type {other:?}"),
            }),
        }
    }
}

/// Wire shape of an inbound message event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageEnvelope {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Version the producer observed; only meaningful for updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl MessageEnvelope {
    pub fn new(
        event_type: EventType,
        id: impl Into<String>,
        sender: impl Into<String>,
        receiver: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            sender: sender.into(),
            receiver: receiver.into(),
            status: String::new(),
            event_type,
            read: false,
            sent: false,
            created_at: None,
            updated_at: None,
            version: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SchemaError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        for (field, value) in [
            ("id", &self.id),
            ("sender", &self.sender),
            ("receiver", &self.receiver),
        ] {
            if value.trim().is_empty() {
                return Err(SchemaError::MissingField(field));
            }
        }

        if let Some(version) = self.version {
            if version < 0 {
                return Err(SchemaError::InvalidField {
                    field: "version",
                    reason: format!("must be non-negative, got {version}"),
                });
            }
        }

        Ok(())
    }
}

/// A message was sent and should be appended to its conversation
#[derive(Debug, Clone, PartialEq)]
pub struct MessageCreated {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub status: String,
    pub read: bool,
    pub sent: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An existing message changed status or content
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdated {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expected_version: Option<i64>,
}

impl MessageUpdated {
    pub fn marks_read(&self) -> bool {
        is_read_status(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Created(MessageCreated),
    Updated(MessageUpdated),
}

impl MessageEvent {
    /// Decode and validate a raw payload
    pub fn decode(payload: &[u8]) -> Result<Self, SchemaError> {
        let envelope: MessageEnvelope = serde_json::from_slice(payload)?;
        Self::try_from(envelope)
    }

    pub fn event_type(&self) -> EventType {
        match self {
            MessageEvent::Created(_) => EventType::Create,
            MessageEvent::Updated(_) => EventType::Update,
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            MessageEvent::Created(event) => &event.id,
            MessageEvent::Updated(event) => &event.id,
        }
    }
}

impl TryFrom<MessageEnvelope> for MessageEvent {
    type Error = SchemaError;

    fn try_from(envelope: MessageEnvelope) -> Result<Self, Self::Error> {
        envelope.validate()?;

        let event = match envelope.event_type {
            // New messages always start at version 0, a producer version is ignored
            EventType::Create => MessageEvent::Created(MessageCreated {
                id: envelope.id,
                sender: envelope.sender,
                receiver: envelope.receiver,
                content: envelope.content,
                status: envelope.status,
                read: envelope.read,
                sent: envelope.sent,
                created_at: envelope.created_at,
                updated_at: envelope.updated_at,
            }),
            EventType::Update => MessageEvent::Updated(MessageUpdated {
                id: envelope.id,
                sender: envelope.sender,
                receiver: envelope.receiver,
                content: envelope.content,
                status: envelope.status,
                created_at: envelope.created_at,
                updated_at: envelope.updated_at,
                expected_version: envelope.version,
            }),
        };

        Ok(event)
    }
}

pub fn is_read_status(status: &str) -> bool {
    READ_STATUSES.contains(&status)
}
