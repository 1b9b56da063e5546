//! Commit-then-publish unit of work.
//!
//! A scope moves `Open → Committing → Committed → EventsDispatched`, or
//! `Committing → Failed` when the store rejects the commit. Events are
//! dispatched only after the store has made them durable, and are cleared
//! from the aggregates whether or not dispatch succeeds; anything the
//! dispatcher misses is still pending in the outbox for the relay.

use std::fmt;

use common::{Clock, EventId};
use message_store::{AggregateStore, ChangeSet, CommitReceipt, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::aggregate::{AuditStamp, TrackedAggregate};
use crate::dispatcher::{DispatchError, EventDispatcher};

/// Lifecycle of one unit-of-work scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Open,
    Committing,
    Committed,
    EventsDispatched,
    Failed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeState::Open => "open",
            ScopeState::Committing => "committing",
            ScopeState::Committed => "committed",
            ScopeState::EventsDispatched => "events dispatched",
            ScopeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The commit did not happen. Nothing was dispatched.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Unit of work is {0}, not open")]
    InvalidState(ScopeState),

    #[error("Commit failed: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to serialize aggregate state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a durable commit. Dispatch problems are reported here rather
/// than as an error, since the write itself succeeded.
#[derive(Debug)]
pub struct CommitOutcome {
    pub receipt: CommitReceipt,
    pub delivered: Vec<EventId>,
    pub dispatch_error: Option<DispatchError>,
}

impl CommitOutcome {
    pub fn fully_dispatched(&self) -> bool {
        self.dispatch_error.is_none()
    }
}

/// Per-request scope over the aggregates one command touches.
pub struct UnitOfWork<'a> {
    store: &'a dyn AggregateStore,
    dispatcher: &'a dyn EventDispatcher,
    clock: &'a dyn Clock,
    tracked: Vec<&'a mut dyn TrackedAggregate>,
    state: ScopeState,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(
        store: &'a dyn AggregateStore,
        dispatcher: &'a dyn EventDispatcher,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
            tracked: Vec::new(),
            state: ScopeState::Open,
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Adds an aggregate to the scope.
    pub fn track(&mut self, aggregate: &'a mut dyn TrackedAggregate) -> Result<(), CommitError> {
        if self.state != ScopeState::Open {
            return Err(CommitError::InvalidState(self.state));
        }
        self.tracked.push(aggregate);
        Ok(())
    }

    /// Stamps audits, commits state and outbox atomically, then dispatches
    /// the batch once.
    ///
    /// `cancellation` is observed by the dispatch step only; a commit that
    /// has started always runs to completion.
    #[tracing::instrument(skip_all, fields(aggregates = self.tracked.len()))]
    pub async fn commit(
        &mut self,
        cancellation: &CancellationToken,
    ) -> Result<CommitOutcome, CommitError> {
        if self.state != ScopeState::Open {
            return Err(CommitError::InvalidState(self.state));
        }
        self.state = ScopeState::Committing;

        let now = self.clock.now();
        let previous: Vec<Option<AuditStamp>> = self
            .tracked
            .iter_mut()
            .map(|aggregate| aggregate.stamp_audit(now))
            .collect();

        let changes = match self.change_set() {
            Ok(changes) => changes,
            Err(err) => {
                self.fail(previous);
                return Err(CommitError::Serialization(err));
            }
        };
        let batch = changes.outbox.clone();

        let receipt = match self.store.commit(changes).await {
            Ok(receipt) => receipt,
            Err(err @ StoreError::Conflict { .. }) => {
                warn!(error = %err, "Stale aggregate; commit rejected, no events dispatched");
                self.fail(previous);
                return Err(CommitError::Store(err));
            }
            Err(err) => {
                error!(error = %err, "Commit failed; no events dispatched");
                self.fail(previous);
                return Err(CommitError::Store(err));
            }
        };
        self.state = ScopeState::Committed;
        for aggregate in self.tracked.iter_mut() {
            aggregate.advance_version();
        }

        let result = self.dispatcher.dispatch(batch, cancellation).await;

        for aggregate in self.tracked.iter_mut() {
            aggregate.discard_pending();
        }
        self.state = ScopeState::EventsDispatched;

        let delivered = match &result {
            Ok(report) => report.delivered.clone(),
            Err(err) => err.delivered().to_vec(),
        };
        if !delivered.is_empty()
            && let Err(err) = self.store.mark_published(&delivered, self.clock.now()).await
        {
            warn!(error = %err, "Failed to mark outbox rows published; relay will resend");
        }

        let dispatch_error = result.err();
        match &dispatch_error {
            None => debug!(events = delivered.len(), "Committed and dispatched"),
            Some(err) => warn!(
                error = %err,
                retryable = err.is_retryable(),
                "Committed but dispatch incomplete; outbox retains the rest"
            ),
        }

        Ok(CommitOutcome {
            receipt,
            delivered,
            dispatch_error,
        })
    }

    fn change_set(&self) -> Result<ChangeSet, serde_json::Error> {
        let mut changes = ChangeSet::default();
        for aggregate in &self.tracked {
            changes.records.push(aggregate.snapshot_record()?);
            changes.outbox.extend(aggregate.pending_envelopes()?);
        }
        Ok(changes)
    }

    fn fail(&mut self, previous: Vec<Option<AuditStamp>>) {
        for (aggregate, stamp) in self.tracked.iter_mut().zip(previous) {
            if let Some(stamp) = stamp {
                aggregate.restore_audit(stamp);
            }
        }
        self.state = ScopeState::Failed;
    }
}

impl fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tracked", &self.tracked.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateRoot;
    use crate::cart::{BuyerId, Cart, CartId};
    use crate::catalog::{Product, ProductId};
    use crate::dispatcher::{ChannelDispatcher, DispatchReport};
    use crate::event::EventContext;
    use crate::value_objects::{Money, Price, Quantity};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use common::{CorrelationId, FixedClock};
    use message_store::{
        InMemoryAggregateStore, InMemoryBroker, MessageEnvelope, OutboxStatus,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingDispatcher {
        batches: Mutex<Vec<Vec<MessageEnvelope>>>,
    }

    impl RecordingDispatcher {
        fn calls(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        fn batch(&self, index: usize) -> Vec<MessageEnvelope> {
            self.batches.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl EventDispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            batch: Vec<MessageEnvelope>,
            _cancellation: &CancellationToken,
        ) -> Result<DispatchReport, DispatchError> {
            let delivered = batch.iter().map(|m| m.message_id).collect();
            self.batches.lock().unwrap().push(batch);
            Ok(DispatchReport { delivered })
        }
    }

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    fn cart_with_two_events(clock: &FixedClock) -> Cart {
        let context = EventContext::new(CorrelationId::new(), clock.now());
        let mut cart = Cart::create(CartId::new(), BuyerId::new(), &context);
        cart.add_item(
            ProductId::new(),
            Some("Widget".to_string()),
            Quantity::new(2).unwrap(),
            Price::new(Money::usd(999)).unwrap(),
            &context,
        )
        .unwrap();
        cart
    }

    fn product(clock: &FixedClock) -> Product {
        let context = EventContext::new(CorrelationId::new(), clock.now());
        Product::create(
            ProductId::new(),
            "Gadget".to_string(),
            Price::new(Money::usd(1500)).unwrap(),
            &context,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn failed_commit_dispatches_nothing_and_keeps_events() {
        let store = InMemoryAggregateStore::new();
        store.set_fail_commits(true);
        let dispatcher = RecordingDispatcher::default();
        let clock = clock();
        let mut cart = cart_with_two_events(&clock);

        let result = {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            let result = uow.commit(&CancellationToken::new()).await;
            assert_eq!(uow.state(), ScopeState::Failed);
            result
        };

        assert!(matches!(result, Err(CommitError::Store(_))));
        assert_eq!(dispatcher.calls(), 0);
        assert_eq!(cart.pending_events().len(), 2);
        assert_eq!(cart.audit().copied(), Some(AuditStamp::default()));
    }

    #[tokio::test]
    async fn successful_commit_dispatches_every_event_once() {
        let store = InMemoryAggregateStore::new();
        let dispatcher = RecordingDispatcher::default();
        let clock = clock();
        let mut cart = cart_with_two_events(&clock);
        let mut product = product(&clock);

        let cart_events: Vec<_> = cart.pending_events().iter().map(|e| e.event_id()).collect();
        let product_events: Vec<_> = product
            .pending_events()
            .iter()
            .map(|e| e.event_id())
            .collect();

        let outcome = {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            uow.track(&mut product).unwrap();
            let outcome = uow.commit(&CancellationToken::new()).await.unwrap();
            assert_eq!(uow.state(), ScopeState::EventsDispatched);
            outcome
        };

        assert!(outcome.fully_dispatched());
        assert_eq!(outcome.receipt.aggregates, 2);
        assert_eq!(outcome.receipt.outbox_messages, 3);
        assert_eq!(dispatcher.calls(), 1);

        let batch = dispatcher.batch(0);
        assert_eq!(batch.len(), 3);
        let cart_order: Vec<_> = batch
            .iter()
            .filter(|m| m.aggregate_type == Cart::AGGREGATE_TYPE)
            .map(|m| m.message_id)
            .collect();
        assert_eq!(cart_order, cart_events);
        assert!(batch.iter().any(|m| m.message_id == product_events[0]));

        assert!(cart.pending_events().is_empty());
        assert!(product.pending_events().is_empty());
        for id in cart_events.iter().chain(&product_events) {
            assert_eq!(store.outbox_status(*id).await, Some(OutboxStatus::Published));
        }
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_the_commit() {
        let store = InMemoryAggregateStore::new();
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_unavailable(true);
        let dispatcher = ChannelDispatcher::new(broker);
        let clock = clock();
        let mut cart = cart_with_two_events(&clock);
        let event_ids: Vec<_> = cart.pending_events().iter().map(|e| e.event_id()).collect();

        let outcome = {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            uow.commit(&CancellationToken::new()).await.unwrap()
        };

        let err = outcome.dispatch_error.expect("dispatch should fail");
        assert!(err.is_retryable());
        assert!(cart.pending_events().is_empty());
        assert_eq!(store.record_count().await, 1);
        for id in event_ids {
            assert_eq!(store.outbox_status(id).await, Some(OutboxStatus::Pending));
        }
    }

    #[tokio::test]
    async fn cancellation_does_not_stop_the_commit() {
        let store = InMemoryAggregateStore::new();
        let broker = Arc::new(InMemoryBroker::new());
        let dispatcher = ChannelDispatcher::new(broker.clone());
        let clock = clock();
        let mut cart = cart_with_two_events(&clock);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            uow.commit(&token).await.unwrap()
        };

        assert!(matches!(
            outcome.dispatch_error,
            Some(DispatchError::Cancelled { .. })
        ));
        assert_eq!(store.commit_count(), 1);
        assert_eq!(broker.published_count().await, 0);
        assert_eq!(store.outbox_len().await, 2);
    }

    #[tokio::test]
    async fn stale_aggregate_is_rejected_and_keeps_its_events() {
        let store = InMemoryAggregateStore::new();
        let dispatcher = RecordingDispatcher::default();
        let clock = clock();
        let context = EventContext::new(CorrelationId::new(), clock.now());
        let cart_id = CartId::new();
        let mut cart = Cart::create(cart_id, BuyerId::new(), &context);
        {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            uow.commit(&CancellationToken::new()).await.unwrap();
        }
        assert_eq!(cart.version(), 1);

        let mut fresh: Cart = crate::repository::load_existing(&store, cart_id).await.unwrap();
        let mut stale: Cart = crate::repository::load_existing(&store, cart_id).await.unwrap();
        let price = Price::new(Money::usd(300)).unwrap();
        fresh
            .add_item(ProductId::new(), None, Quantity::new(1).unwrap(), price, &context)
            .unwrap();
        stale
            .add_item(ProductId::new(), None, Quantity::new(2).unwrap(), price, &context)
            .unwrap();
        {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut fresh).unwrap();
            uow.commit(&CancellationToken::new()).await.unwrap();
        }

        let result = {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut stale).unwrap();
            let result = uow.commit(&CancellationToken::new()).await;
            assert_eq!(uow.state(), ScopeState::Failed);
            result
        };

        assert!(matches!(
            result,
            Err(CommitError::Store(StoreError::Conflict { expected: 1, .. }))
        ));
        assert_eq!(dispatcher.calls(), 2);
        assert_eq!(stale.version(), 1);
        assert_eq!(stale.pending_events().len(), 1);
        assert_eq!(fresh.version(), 2);
        let stored: Cart = crate::repository::load_existing(&store, cart_id).await.unwrap();
        assert_eq!(stored.lines().len(), 1);
        assert_eq!(stored.item_count(), 1);
    }

    #[tokio::test]
    async fn scope_commits_only_once() {
        let store = InMemoryAggregateStore::new();
        let dispatcher = RecordingDispatcher::default();
        let clock = clock();
        let mut cart = cart_with_two_events(&clock);

        let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
        uow.track(&mut cart).unwrap();
        uow.commit(&CancellationToken::new()).await.unwrap();

        let err = uow.commit(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            CommitError::InvalidState(ScopeState::EventsDispatched)
        ));
        assert_eq!(dispatcher.calls(), 1);
    }

    #[tokio::test]
    async fn audit_stamps_come_from_the_clock() {
        let store = InMemoryAggregateStore::new();
        let dispatcher = RecordingDispatcher::default();
        let clock = clock();
        let created = clock.now();
        let mut cart = cart_with_two_events(&clock);

        {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            uow.commit(&CancellationToken::new()).await.unwrap();
        }

        clock.advance(Duration::minutes(5));
        {
            let mut uow = UnitOfWork::new(&store, &dispatcher, &clock);
            uow.track(&mut cart).unwrap();
            uow.commit(&CancellationToken::new()).await.unwrap();
        }

        let audit = cart.audit().copied().unwrap();
        assert_eq!(audit.created_at, Some(created));
        assert_eq!(audit.updated_at, Some(created + Duration::minutes(5)));
    }
}
