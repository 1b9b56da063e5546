//! Seams to the message transport. The transport itself is opaque: any
//! durable pub/sub system can sit behind these traits.

use async_trait::async_trait;

use crate::{MessageEnvelope, Result};

/// Fan-out side of the transport, used by the event dispatcher.
///
/// Implementations must be safe to share between concurrent publishes.
#[async_trait]
pub trait PublishChannel: Send + Sync {
    async fn publish(&self, message: &MessageEnvelope) -> Result<()>;
}

/// Point-to-point side of the transport, used to resubmit a message to one
/// named processing queue.
#[async_trait]
pub trait QueueSender: Send + Sync {
    async fn send(&self, queue: &str, message: MessageEnvelope) -> Result<()>;
}

/// Pull side of a named processing queue.
#[async_trait]
pub trait QueueReceiver: Send + Sync {
    /// Takes the next message, or `None` when the queue is drained.
    async fn receive(&self, queue: &str) -> Result<Option<MessageEnvelope>>;

    /// Puts back a received message that was not settled, so the next
    /// `receive` returns it again.
    async fn abandon(&self, queue: &str, message: MessageEnvelope) -> Result<()>;
}
