pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ParticipantPair};
pub use message::{Message, MessageUpdate};
