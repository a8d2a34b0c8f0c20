use super::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The two participants of a conversation
///
/// Order is kept for display (first contact order) but never matters for
/// identity: `(a, b)` and `(b, a)` have the same [`ParticipantPair::key`].
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct ParticipantPair {
    first: String,
    second: String,
}

impl ParticipantPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            first: a.into(),
            second: b.into(),
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }

    /// Participants in ascending order
    pub fn sorted(&self) -> (&str, &str) {
        if self.first <= self.second {
            (&self.first, &self.second)
        } else {
            (&self.second, &self.first)
        }
    }

    /// Canonical storage key, `<len(low)>:<low>:<high>`
    ///
    /// The length prefix keeps the encoding unambiguous when identifiers
    /// themselves contain `:`.
    pub fn key(&self) -> String {
        let (low, high) = self.sorted();
        format!("{}:{}:{}", low.len(), low, high)
    }

    pub fn contains(&self, participant: &str) -> bool {
        self.first == participant || self.second == participant
    }
}

impl PartialEq for ParticipantPair {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl std::hash::Hash for ParticipantPair {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.sorted().hash(state);
    }
}

impl fmt::Display for ParticipantPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.first, self.second)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: [String; 2],
    pub pair_key: String,
    /// One page of messages, CreatedAt ascending; empty when loaded without messages
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(pair: &ParticipantPair) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            participants: [pair.first().to_string(), pair.second().to_string()],
            pair_key: pair.key(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pair(&self) -> ParticipantPair {
        ParticipantPair::new(self.participants[0].clone(), self.participants[1].clone())
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_unordered() {
        let ab = ParticipantPair::new("foo", "bar");
        let ba = ParticipantPair::new("bar", "foo");

        assert_eq!(ab, ba);
        assert_eq!(ab.key(), ba.key());
        assert_eq!(ab.key(), "3:bar:foo");
        assert_eq!(ab.first(), "foo");
    }

    #[test]
    fn test_pair_key_is_unambiguous() {
        // Naive "low:high" joining would collide for these two pairs
        let left = ParticipantPair::new("a:b", "c");
        let right = ParticipantPair::new("a", "b:c");
        assert_ne!(left.key(), right.key());
    }

    #[test]
    fn test_self_conversation() {
        let pair = ParticipantPair::new("foo", "foo");
        assert_eq!(pair.key(), "3:foo:foo");
        assert!(pair.contains("foo"));
    }

    #[test]
    fn test_conversation_serializes_camel_case() {
        let conversation = Conversation::new(&ParticipantPair::new("foo", "bar"));
        let value = serde_json::to_value(&conversation).unwrap();

        assert_eq!(value["pairKey"], "3:bar:foo");
        assert_eq!(value["participants"][0], "foo");
        assert!(value["messages"].as_array().unwrap().is_empty());
        assert!(value.get("createdAt").is_some());
    }
}
