use async_trait::async_trait;
use message_store::MessageEnvelope;

use crate::ConsumerError;

/// A handler for messages arriving on one queue.
///
/// Delivery is at-least-once, so `handle` must be safe to call more than
/// once for the same message.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Stable name; the processed-message log is keyed by it.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &MessageEnvelope) -> Result<(), ConsumerError>;
}
