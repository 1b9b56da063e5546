//! Delivery from the broker to consumers: read-model updates, redelivery,
//! dead-lettering and replay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::SystemClock;
use consumers::{
    CART_SUMMARY_QUEUE, CartSummaryProjection, Consumer, ConsumerError, ConsumerWorker,
    DeadLetterManager, DeliveryOutcome, DeliveryRunner, RetryPolicy,
};
use domain::{AddItemToCart, BuyerId, CartService, ChannelDispatcher, CreateCart, ProductId};
use message_store::{
    DeadLetterStatus, DeadLetterStore, InMemoryAggregateStore, InMemoryBroker,
    InMemoryDeadLetterStore, InMemoryProcessedMessages, MessageEnvelope, QueueSender,
};
use pipeline::{CommandHandler, RequestContext};

struct World {
    broker: Arc<InMemoryBroker>,
    dead_letters: Arc<InMemoryDeadLetterStore>,
    service: CartService,
}

async fn world() -> World {
    let broker = Arc::new(InMemoryBroker::new());
    broker.bind(CART_SUMMARY_QUEUE).await;
    let service = CartService::new(
        Arc::new(InMemoryAggregateStore::new()),
        Arc::new(ChannelDispatcher::new(broker.clone())),
        Arc::new(SystemClock),
    );
    World {
        broker,
        dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
        service,
    }
}

fn runner(world: &World, consumer: Arc<dyn Consumer>) -> DeliveryRunner {
    DeliveryRunner::new(
        consumer,
        Arc::new(InMemoryProcessedMessages::new()),
        world.dead_letters.clone(),
        Arc::new(SystemClock),
    )
    .with_policy(RetryPolicy::immediate(3))
}

#[tokio::test]
async fn committed_cart_events_reach_the_summary() {
    let world = world().await;
    let context = RequestContext::default();
    let create = CreateCart::new(BuyerId::new());
    let cart_id = create.cart_id;
    world.service.handle(create, &context).await.unwrap();
    let product = ProductId::new();
    for quantity in [2, 3] {
        world
            .service
            .handle(AddItemToCart::new(cart_id, product, quantity, 400), &context)
            .await
            .unwrap();
    }

    let projection = Arc::new(CartSummaryProjection::new());
    let worker = ConsumerWorker::new(
        CART_SUMMARY_QUEUE,
        world.broker.clone(),
        runner(&world, projection.clone()),
    );

    assert_eq!(worker.run_once().await.unwrap(), 3);

    let summary = projection.get(cart_id).await.unwrap();
    assert_eq!(summary.item_count, 5);
    assert_eq!(summary.total_cents, 2_000);
    assert!(world.dead_letters.is_empty().await);
}

#[tokio::test]
async fn redelivered_events_leave_the_summary_unchanged() {
    let world = world().await;
    let context = RequestContext::default();
    let create = CreateCart::new(BuyerId::new());
    let cart_id = create.cart_id;
    world.service.handle(create, &context).await.unwrap();
    world
        .service
        .handle(AddItemToCart::new(cart_id, ProductId::new(), 1, 999), &context)
        .await
        .unwrap();

    let projection = Arc::new(CartSummaryProjection::new());
    let runner = runner(&world, projection.clone());
    let worker = ConsumerWorker::new(CART_SUMMARY_QUEUE, world.broker.clone(), runner.clone());
    worker.run_once().await.unwrap();
    let before = projection.get(cart_id).await.unwrap();

    for message in world.broker.published().await {
        let outcome = runner.deliver(CART_SUMMARY_QUEUE, message).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Duplicate);
    }

    assert_eq!(projection.get(cart_id).await.unwrap(), before);
}

/// Rejects everything until switched healthy.
#[derive(Default)]
struct Flaky {
    healthy: AtomicBool,
}

#[async_trait]
impl Consumer for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn handle(&self, _message: &MessageEnvelope) -> Result<(), ConsumerError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConsumerError::transient("downstream unavailable"))
        }
    }
}

#[tokio::test]
async fn dead_letter_replay_succeeds_once_the_consumer_recovers() {
    let world = world().await;
    world
        .service
        .handle(CreateCart::new(BuyerId::new()), &RequestContext::default())
        .await
        .unwrap();

    let flaky = Arc::new(Flaky::default());
    let worker = ConsumerWorker::new(
        CART_SUMMARY_QUEUE,
        world.broker.clone(),
        runner(&world, flaky.clone()),
    );
    worker.run_once().await.unwrap();

    let parked = world.dead_letters.list(CART_SUMMARY_QUEUE, 10).await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].failure_count, 3);
    assert_eq!(parked[0].retry_attempts, 2);
    let sequence = parked[0].sequence_number;

    let manager = DeadLetterManager::new(world.dead_letters.clone(), world.broker.clone());
    manager
        .retry_dead_letter(CART_SUMMARY_QUEUE, sequence)
        .await
        .unwrap();
    flaky.healthy.store(true, Ordering::SeqCst);
    assert_eq!(worker.run_once().await.unwrap(), 1);

    assert!(world.dead_letters.is_empty().await);
}

#[tokio::test]
async fn failed_replay_leaves_the_record_dead() {
    let world = world().await;
    world
        .service
        .handle(CreateCart::new(BuyerId::new()), &RequestContext::default())
        .await
        .unwrap();

    let worker = ConsumerWorker::new(
        CART_SUMMARY_QUEUE,
        world.broker.clone(),
        runner(&world, Arc::new(Flaky::default())),
    );
    worker.run_once().await.unwrap();
    let sequence = world.dead_letters.list(CART_SUMMARY_QUEUE, 1).await.unwrap()[0].sequence_number;

    DeadLetterManager::new(world.dead_letters.clone(), world.broker.clone())
        .retry_dead_letter(CART_SUMMARY_QUEUE, sequence)
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    let record = world
        .dead_letters
        .get(CART_SUMMARY_QUEUE, sequence)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, DeadLetterStatus::Dead);
    assert_eq!(record.failure_count, 6);
    assert_eq!(world.dead_letters.len().await, 1);
}

#[tokio::test]
async fn retrying_a_missing_dead_letter_sends_nothing() {
    let world = world().await;
    let manager = DeadLetterManager::new(world.dead_letters.clone(), world.broker.clone());

    let err = manager.retry_dead_letter("orders-queue", 42).await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(world.broker.queue_depth("orders-queue").await, 0);
}

#[tokio::test]
async fn worker_stops_on_shutdown() {
    let world = world().await;
    let worker = ConsumerWorker::new(
        CART_SUMMARY_QUEUE,
        world.broker.clone(),
        runner(&world, Arc::new(CartSummaryProjection::new())),
    )
    .with_idle_interval(std::time::Duration::from_millis(5));
    let shutdown = pipeline::CancellationToken::new();

    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });
    let noise = MessageEnvelope::builder()
        .event_type("ProductCreated")
        .aggregate_type("Product")
        .aggregate_id(ProductId::new())
        .payload_raw(serde_json::json!({}))
        .build()
        .unwrap();
    world.broker.send(CART_SUMMARY_QUEUE, noise).await.unwrap();
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
