//! Broker topology shared by producers and the messages service.
//!
//! Every message lifecycle event goes to one exchange. Each queue is bound by
//! a routing key, and the routing key travels with the record in the
//! `event_type` header.

pub const MESSAGE_EVENTS_EXCHANGE: &str = "MessageEventsExchange";

pub const MESSAGE_SENT_QUEUE: &str = "MESSAGES_SRV_MessageSentQueue";
pub const MESSAGE_DELIVERED_QUEUE: &str = "MESSAGES_SRV_MessageDeliveredQueue";
pub const MESSAGE_READ_QUEUE: &str = "MESSAGES_SRV_MessageReadQueue";

pub const ROUTING_KEY_SENT: &str = "message.sent";
pub const ROUTING_KEY_DELIVERED: &str = "message.delivered";
pub const ROUTING_KEY_READ: &str = "message.read";

/// Record header carrying the routing key
pub const ROUTING_KEY_HEADER: &str = "event_type";

/// Which handler consumes a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: &'static str,
    pub routing_key: &'static str,
    pub handler: HandlerKind,
}

pub const QUEUE_BINDINGS: [QueueBinding; 3] = [
    QueueBinding {
        queue: MESSAGE_SENT_QUEUE,
        routing_key: ROUTING_KEY_SENT,
        handler: HandlerKind::Created,
    },
    QueueBinding {
        queue: MESSAGE_DELIVERED_QUEUE,
        routing_key: ROUTING_KEY_DELIVERED,
        handler: HandlerKind::Updated,
    },
    QueueBinding {
        queue: MESSAGE_READ_QUEUE,
        routing_key: ROUTING_KEY_READ,
        handler: HandlerKind::Updated,
    },
];

impl QueueBinding {
    /// A delivery without a routing key is treated as fanout and accepted
    pub fn accepts(&self, routing_key: Option<&str>) -> bool {
        routing_key.map_or(true, |key| key == self.routing_key)
    }
}
