use chrono::{DateTime, Utc};
use event_schema::{EventType, MessageCreated};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message as stored; `version` starts at 0 and moves forward by one per update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: Uuid,
    pub content: String,
    pub sender: String,
    pub receiver: String,
    pub status: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub read: bool,
    pub sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Message {
    pub fn from_created(event: &MessageCreated, conversation_id: Uuid) -> Self {
        let now = Utc::now();
        let created_at = event.created_at.unwrap_or(now);
        Self {
            id: event.id.clone(),
            conversation_id,
            content: event.content.clone(),
            sender: event.sender.clone(),
            receiver: event.receiver.clone(),
            status: event.status.clone(),
            event_type: EventType::Create,
            read: event.read,
            sent: event.sent,
            created_at,
            updated_at: event.updated_at.unwrap_or(created_at),
            version: 0,
        }
    }

    /// Apply an update in place and bump the version
    pub fn apply(&mut self, update: &MessageUpdate) {
        if let Some(content) = &update.content {
            self.content = content.clone();
        }
        if let Some(status) = &update.status {
            self.status = status.clone();
        }
        if let Some(created_at) = update.created_at {
            self.created_at = created_at;
        }
        self.event_type = update.event_type;
        self.read = update.read;
        self.updated_at = update.updated_at;
        self.version += 1;
    }
}

/// Field changes carried by a versioned update; `None` leaves the stored value
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub status: Option<String>,
    pub event_type: EventType,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MessageUpdate {
    /// True when the stored row already carries every field this update writes
    pub fn is_applied_to(&self, message: &Message) -> bool {
        self.content.as_ref().map_or(true, |c| *c == message.content)
            && self.status.as_ref().map_or(true, |s| *s == message.status)
            && self.created_at.map_or(true, |t| t == message.created_at)
            && self.event_type == message.event_type
            && self.read == message.read
            && self.updated_at == message.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> MessageCreated {
        MessageCreated {
            id: "m1".into(),
            sender: "foo".into(),
            receiver: "bar".into(),
            content: "hi".into(),
            status: "message.sent".into(),
            read: false,
            sent: true,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_from_created_starts_at_version_zero() {
        let conversation_id = Uuid::new_v4();
        let message = Message::from_created(&created(), conversation_id);

        assert_eq!(message.version, 0);
        assert_eq!(message.conversation_id, conversation_id);
        assert_eq!(message.event_type, EventType::Create);
        assert!(message.sent);
        assert_eq!(message.created_at, message.updated_at);
    }

    #[test]
    fn test_apply_keeps_unset_fields() {
        let mut message = Message::from_created(&created(), Uuid::new_v4());
        let original_created = message.created_at;

        message.apply(&MessageUpdate {
            content: None,
            status: Some("message.read".into()),
            event_type: EventType::Update,
            read: true,
            created_at: None,
            updated_at: Utc::now(),
        });

        assert_eq!(message.content, "hi");
        assert_eq!(message.status, "message.read");
        assert_eq!(message.created_at, original_created);
        assert!(message.read);
        assert_eq!(message.version, 1);
    }

    #[test]
    fn test_is_applied_to() {
        let mut message = Message::from_created(&created(), Uuid::new_v4());
        let update = MessageUpdate {
            content: None,
            status: Some("message.read".into()),
            event_type: EventType::Update,
            read: true,
            created_at: None,
            updated_at: Utc::now(),
        };
        assert!(!update.is_applied_to(&message));

        message.apply(&update);
        assert!(update.is_applied_to(&message));

        let later = MessageUpdate {
            updated_at: update.updated_at + chrono::Duration::seconds(1),
            ..update
        };
        assert!(!later.is_applied_to(&message));
    }

    #[test]
    fn test_message_json_uses_type_field() {
        let message = Message::from_created(&created(), Uuid::new_v4());
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "create");
        assert_eq!(value["conversationId"], message.conversation_id.to_string());
        assert_eq!(value["version"], 0);
    }
}
