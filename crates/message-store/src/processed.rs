use async_trait::async_trait;

use crate::{EventId, Result};

/// Log of messages each consumer has fully handled, keyed by message id.
///
/// Lets at-least-once delivery look exactly-once to a consumer.
#[async_trait]
pub trait ProcessedMessages: Send + Sync {
    async fn is_processed(&self, consumer: &str, message_id: EventId) -> Result<bool>;

    /// Returns `false` when the message was already recorded.
    async fn mark_processed(&self, consumer: &str, message_id: EventId) -> Result<bool>;
}
