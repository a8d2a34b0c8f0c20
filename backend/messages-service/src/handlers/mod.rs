use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use event_schema::{EventType, MessageEvent};

pub mod created;
pub mod updated;

pub use created::MessageCreatedHandler;
pub use updated::MessageUpdatedHandler;

/// What a successful handler invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// State changed
    Applied,
    /// The event had been applied before (redelivery)
    AlreadyApplied,
    /// Nothing to change, e.g. an update for a message that does not exist
    Skipped,
}

impl HandlerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Applied => "applied",
            HandlerOutcome::AlreadyApplied => "already_applied",
            HandlerOutcome::Skipped => "skipped",
        }
    }
}

/// Turns one raw delivery payload into store operations
///
/// Any `Err` means the delivery was not processed and must not be acked.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &[u8]) -> AppResult<HandlerOutcome>;
}

/// Error for an envelope whose `type` does not match the queue's handler
fn unexpected_event(expected: EventType, event: &MessageEvent) -> AppError {
    AppError::SchemaViolation(format!(
        "expected {} event, got {} for message {}",
        expected.as_str(),
        event.event_type().as_str(),
        event.message_id()
    ))
}
