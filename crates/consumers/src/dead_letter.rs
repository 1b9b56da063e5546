//! Operator-facing dead-letter replay.

use std::sync::Arc;

use common::EventId;
use message_store::{
    DEAD_LETTER_QUEUE_HEADER, DEAD_LETTER_SEQUENCE_HEADER, DeadLetterRecord, DeadLetterStatus,
    DeadLetterStore, QueueSender,
};
use serde::Serialize;
use tracing::{error, info};

use crate::RetryDeadLetterError;

/// Confirms that a dead letter was put back on its queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryReceipt {
    pub queue: String,
    pub sequence: i64,
    pub message_id: EventId,
}

/// Lists parked messages and resubmits them for processing.
#[derive(Clone)]
pub struct DeadLetterManager {
    store: Arc<dyn DeadLetterStore>,
    sender: Arc<dyn QueueSender>,
}

impl DeadLetterManager {
    pub fn new(store: Arc<dyn DeadLetterStore>, sender: Arc<dyn QueueSender>) -> Self {
        Self { store, sender }
    }

    pub async fn list(
        &self,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterRecord>, RetryDeadLetterError> {
        Ok(self.store.list(queue, limit).await?)
    }

    /// Resubmits the record `(queue, sequence)` to the queue it failed on.
    ///
    /// The record stays in the store, marked `Retrying`, until a consumer
    /// processes the replay (which deletes it) or fails it again (which marks
    /// it `Dead`). A missing record sends nothing.
    #[tracing::instrument(skip(self))]
    pub async fn retry_dead_letter(
        &self,
        queue: &str,
        sequence: i64,
    ) -> Result<RetryReceipt, RetryDeadLetterError> {
        let Some(record) = self.store.get(queue, sequence).await? else {
            info!("Dead letter not found, nothing to retry");
            return Err(RetryDeadLetterError::NotFound {
                queue: queue.to_string(),
                sequence,
            });
        };

        self.store
            .update_status(queue, sequence, DeadLetterStatus::Retrying)
            .await?;

        let message_id = record.envelope.message_id;
        let replay = record
            .envelope
            .with_header(DEAD_LETTER_QUEUE_HEADER, queue)
            .with_header(DEAD_LETTER_SEQUENCE_HEADER, sequence.to_string());

        if let Err(err) = self.sender.send(&record.queue_name, replay).await {
            error!(error = %err, "Failed to resubmit dead letter");
            self.store
                .update_status(queue, sequence, record.status)
                .await?;
            return Err(err.into());
        }

        metrics::counter!("dead_letter_retries_total", "queue" => queue.to_string()).increment(1);
        info!(%message_id, "Dead letter resubmitted");

        Ok(RetryReceipt {
            queue: queue.to_string(),
            sequence,
            message_id,
        })
    }
}

impl std::fmt::Debug for DeadLetterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterManager").finish_non_exhaustive()
    }
}
