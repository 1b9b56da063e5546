//! Replays outbox rows that the post-commit dispatch did not deliver.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use message_store::{AggregateStore, OutboxStatus, StoreError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchError, EventDispatcher};

const DEFAULT_BATCH_SIZE: usize = 100;

/// Failed relays after which a transiently failing row is given up.
pub const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 10;

/// What one relay pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Rows moved out of the pending set for good during this pass.
    pub given_up: usize,
}

/// Periodically republishes pending outbox rows older than a grace period.
///
/// The grace period keeps the relay from racing the dispatch that runs
/// right after each commit. Consumers deduplicate by message id, so a row
/// delivered twice is harmless.
///
/// A row the channel rejects outright, or that fails `max_attempts` passes,
/// is marked failed so it cannot hold up the rows behind it.
#[derive(Clone)]
pub struct OutboxRelay {
    store: Arc<dyn AggregateStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    batch_size: usize,
    max_attempts: u32,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        dispatcher: Arc<dyn EventDispatcher>,
        clock: Arc<dyn Clock>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            grace,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_OUTBOX_MAX_ATTEMPTS,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Runs one pass: load pending rows, dispatch them, mark what landed.
    pub async fn relay_once(
        &self,
        cancellation: &CancellationToken,
    ) -> Result<RelayReport, StoreError> {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::zero());
        let cutoff = self.clock.now() - grace;
        let pending = self.store.pending_outbox(cutoff, self.batch_size).await?;
        if pending.is_empty() {
            return Ok(RelayReport::default());
        }

        let attempted = pending.len();
        let (delivered, failures) = match self.dispatcher.dispatch(pending, cancellation).await {
            Ok(report) => (report.delivered, Vec::new()),
            Err(err) => {
                warn!(error = %err, "Outbox relay dispatch incomplete");
                let delivered = err.delivered().to_vec();
                match err {
                    DispatchError::Partial { failures, .. } => (delivered, failures),
                    DispatchError::Cancelled { .. } => (delivered, Vec::new()),
                }
            }
        };

        if !delivered.is_empty() {
            self.store
                .mark_published(&delivered, self.clock.now())
                .await?;
            metrics::counter!("outbox_relayed_total").increment(delivered.len() as u64);
        }

        let mut given_up = 0;
        for failure in &failures {
            let status = self
                .store
                .record_publish_failure(
                    failure.message_id,
                    &failure.reason,
                    !failure.transient,
                    self.max_attempts,
                )
                .await?;
            if status == Some(OutboxStatus::Failed) {
                given_up += 1;
                error!(
                    message_id = %failure.message_id,
                    event_type = %failure.event_type,
                    reason = %failure.reason,
                    "Giving up on outbox row"
                );
            }
        }
        if given_up > 0 {
            metrics::counter!("outbox_failed_total").increment(given_up as u64);
        }

        debug!(
            attempted,
            delivered = delivered.len(),
            given_up,
            "Outbox relay pass"
        );
        Ok(RelayReport {
            attempted,
            delivered: delivered.len(),
            given_up,
        })
    }

    /// Runs passes every `interval` until `cancellation` fires.
    pub async fn run(&self, interval: Duration, cancellation: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "Outbox relay started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.relay_once(&cancellation).await {
                        error!(error = %err, "Outbox relay pass failed");
                    }
                }
            }
        }
        info!("Outbox relay stopped");
    }
}

impl std::fmt::Debug for OutboxRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxRelay")
            .field("grace", &self.grace)
            .field("batch_size", &self.batch_size)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ChannelDispatcher;
    use chrono::{TimeZone, Utc};
    use common::{EventId, FixedClock};
    use message_store::{ChangeSet, InMemoryAggregateStore, InMemoryBroker, MessageEnvelope};
    use uuid::Uuid;

    fn envelope(at: chrono::DateTime<Utc>) -> MessageEnvelope {
        typed_envelope("CartCreated", at)
    }

    fn typed_envelope(event_type: &str, at: chrono::DateTime<Utc>) -> MessageEnvelope {
        MessageEnvelope::builder()
            .event_type(event_type)
            .aggregate_type("Cart")
            .aggregate_id(Uuid::new_v4())
            .occurred_at(at)
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryAggregateStore>,
        broker: Arc<InMemoryBroker>,
        clock: Arc<FixedClock>,
        relay: OutboxRelay,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryAggregateStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let relay = OutboxRelay::new(
            store.clone(),
            Arc::new(ChannelDispatcher::new(broker.clone())),
            clock.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            store,
            broker,
            clock,
            relay,
        }
    }

    async fn seed(store: &InMemoryAggregateStore, message: MessageEnvelope) -> EventId {
        let id = message.message_id;
        store
            .commit(ChangeSet {
                records: vec![],
                outbox: vec![message],
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn relays_rows_past_the_grace_period() {
        let f = fixture();
        let old = seed(&f.store, envelope(f.clock.now() - chrono::Duration::seconds(30))).await;
        let fresh = seed(&f.store, envelope(f.clock.now())).await;

        let report = f.relay.relay_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            report,
            RelayReport {
                attempted: 1,
                delivered: 1,
                given_up: 0
            }
        );
        assert_eq!(f.store.outbox_status(old).await, Some(OutboxStatus::Published));
        assert_eq!(f.store.outbox_status(fresh).await, Some(OutboxStatus::Pending));
        assert_eq!(f.broker.published_count().await, 1);
    }

    #[tokio::test]
    async fn failed_relay_leaves_rows_pending() {
        let f = fixture();
        let id = seed(&f.store, envelope(f.clock.now() - chrono::Duration::minutes(1))).await;
        f.broker.set_unavailable(true);

        let report = f.relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(f.store.outbox_status(id).await, Some(OutboxStatus::Pending));

        f.broker.set_unavailable(false);
        let report = f.relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(f.store.outbox_status(id).await, Some(OutboxStatus::Published));
    }

    #[tokio::test]
    async fn rejected_rows_do_not_block_the_rows_behind_them() {
        let f = fixture();
        let relay = f.relay.clone().with_batch_size(2);
        f.broker.reject_event_type("Poison").await;
        let minute_ago = f.clock.now() - chrono::Duration::minutes(1);
        let first = seed(&f.store, typed_envelope("Poison", minute_ago)).await;
        let second = seed(&f.store, typed_envelope("Poison", minute_ago)).await;
        let good = seed(&f.store, envelope(minute_ago + chrono::Duration::seconds(1))).await;

        let report = relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(
            report,
            RelayReport {
                attempted: 2,
                delivered: 0,
                given_up: 2
            }
        );
        assert_eq!(f.store.outbox_status(first).await, Some(OutboxStatus::Failed));
        assert_eq!(f.store.outbox_status(second).await, Some(OutboxStatus::Failed));

        let report = relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(f.store.outbox_status(good).await, Some(OutboxStatus::Published));
    }

    #[tokio::test]
    async fn transient_failures_give_up_after_max_attempts() {
        let f = fixture();
        let relay = f.relay.clone().with_max_attempts(2);
        let id = seed(&f.store, envelope(f.clock.now() - chrono::Duration::minutes(1))).await;
        f.broker.set_unavailable(true);

        let report = relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.given_up, 0);
        assert_eq!(f.store.outbox_status(id).await, Some(OutboxStatus::Pending));

        let report = relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.given_up, 1);
        assert_eq!(f.store.outbox_status(id).await, Some(OutboxStatus::Failed));
        let (attempts, reason) = f.store.outbox_attempts(id).await.unwrap();
        assert_eq!(attempts, 2);
        assert!(reason.is_some());

        f.broker.set_unavailable(false);
        let report = relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, RelayReport::default());
    }

    #[tokio::test]
    async fn empty_outbox_is_a_no_op() {
        let f = fixture();
        let report = f.relay.relay_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report, RelayReport::default());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let f = fixture();
        let token = CancellationToken::new();
        let relay = f.relay.clone();
        let handle = tokio::spawn({
            let token = token.clone();
            async move { relay.run(Duration::from_millis(10), token).await }
        });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay should stop")
            .unwrap();
    }
}
