//! Concurrent fan-out of committed events to the publish channel.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::EventId;
use futures_util::FutureExt;
use message_store::{MessageEnvelope, PublishChannel};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ids of the messages a dispatch call got onto the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<EventId>,
}

/// One publish that did not make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishFailure {
    pub message_id: EventId,
    pub event_type: String,
    pub reason: String,
    pub transient: bool,
}

/// Dispatch did not deliver the whole batch. Messages already published
/// stay published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{} of the batch failed to publish", failures.len())]
    Partial {
        delivered: Vec<EventId>,
        failures: Vec<PublishFailure>,
    },

    #[error("Dispatch cancelled after {} deliveries", delivered.len())]
    Cancelled { delivered: Vec<EventId> },
}

impl DispatchError {
    pub fn delivered(&self) -> &[EventId] {
        match self {
            DispatchError::Partial { delivered, .. } => delivered,
            DispatchError::Cancelled { delivered } => delivered,
        }
    }

    /// True when replaying the undelivered messages can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Partial { failures, .. } => failures.iter().any(|f| f.transient),
            DispatchError::Cancelled { .. } => true,
        }
    }
}

/// Hands a batch of committed events to the message channel.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Publishes every message once. Completes after all publishes settle or
    /// `cancellation` fires.
    async fn dispatch(
        &self,
        batch: Vec<MessageEnvelope>,
        cancellation: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError>;
}

/// [`EventDispatcher`] spawning one task per message and joining them all.
#[derive(Clone)]
pub struct ChannelDispatcher {
    channel: Arc<dyn PublishChannel>,
}

impl ChannelDispatcher {
    pub fn new(channel: Arc<dyn PublishChannel>) -> Self {
        Self { channel }
    }
}

impl std::fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDispatcher").finish_non_exhaustive()
    }
}

type PublishOutcome = (EventId, Result<(), PublishFailure>);

#[async_trait]
impl EventDispatcher for ChannelDispatcher {
    #[tracing::instrument(skip_all, fields(batch_size = batch.len()))]
    async fn dispatch(
        &self,
        batch: Vec<MessageEnvelope>,
        cancellation: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        if cancellation.is_cancelled() {
            return Err(DispatchError::Cancelled {
                delivered: Vec::new(),
            });
        }

        let start = Instant::now();
        let mut pending: HashMap<EventId, String> = HashMap::with_capacity(batch.len());
        let mut tasks: JoinSet<PublishOutcome> = JoinSet::new();

        for message in batch {
            pending.insert(message.message_id, message.event_type.clone());
            let channel = Arc::clone(&self.channel);
            tasks.spawn(publish_one(channel, message));
        }

        let mut delivered = Vec::with_capacity(pending.len());
        let mut failures = Vec::new();

        loop {
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    tasks.abort_all();
                    warn!(
                        delivered = delivered.len(),
                        abandoned = pending.len(),
                        "Dispatch cancelled"
                    );
                    return Err(DispatchError::Cancelled { delivered });
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((message_id, Ok(()))) => {
                            pending.remove(&message_id);
                            delivered.push(message_id);
                        }
                        Ok((message_id, Err(failure))) => {
                            pending.remove(&message_id);
                            failures.push(failure);
                        }
                        // publish_one catches panics; this is runtime shutdown.
                        Err(err) => warn!(error = %err, "Publish task did not complete"),
                    }
                }
            }
        }

        for (message_id, event_type) in pending {
            failures.push(PublishFailure {
                message_id,
                event_type,
                reason: "publish task did not complete".to_string(),
                transient: true,
            });
        }

        metrics::histogram!("event_dispatch_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        if failures.is_empty() {
            debug!(delivered = delivered.len(), "Batch dispatched");
            Ok(DispatchReport { delivered })
        } else {
            warn!(
                delivered = delivered.len(),
                failed = failures.len(),
                "Batch partially dispatched"
            );
            Err(DispatchError::Partial {
                delivered,
                failures,
            })
        }
    }
}

async fn publish_one(channel: Arc<dyn PublishChannel>, message: MessageEnvelope) -> PublishOutcome {
    let message_id = message.message_id;
    let result = AssertUnwindSafe(channel.publish(&message))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(())) => {
            metrics::counter!("events_published_total", "event_type" => message.event_type.clone())
                .increment(1);
            Ok(())
        }
        Ok(Err(err)) => Err(PublishFailure {
            message_id,
            event_type: message.event_type.clone(),
            transient: err.is_transient(),
            reason: err.to_string(),
        }),
        Err(_) => Err(PublishFailure {
            message_id,
            event_type: message.event_type.clone(),
            reason: "publish panicked".to_string(),
            transient: false,
        }),
    };

    if let Err(failure) = &outcome {
        metrics::counter!("events_publish_failed_total", "event_type" => message.event_type.clone())
            .increment(1);
        warn!(
            event_id = %failure.message_id,
            event_type = %failure.event_type,
            reason = %failure.reason,
            transient = failure.transient,
            "Publish failed"
        );
    }

    (message_id, outcome)
}
