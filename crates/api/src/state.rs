//! Shared application state and the wiring that builds it.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, SystemClock};
use consumers::{
    CART_SUMMARY_QUEUE, CartSummaryProjection, ConsumerWorker, DeadLetterManager, DeliveryRunner,
    RetryPolicy,
};
use domain::{
    AddItemToCart, CartService, CatalogService, ChangeItemQuantity, ChangeProductPrice,
    ChannelDispatcher, CheckoutCart, CreateCart, CreateProduct, DiscontinueProduct,
    EventDispatcher, OutboxRelay, RemoveItemFromCart,
};
use message_store::{
    AggregateStore, DeadLetterStore, InMemoryAggregateStore, InMemoryBroker,
    InMemoryDeadLetterStore, InMemoryProcessedMessages, PostgresMessageStore, ProcessedMessages,
};
use pipeline::Pipeline;

use crate::config::Config;

/// Every command the API accepts, each wrapped in the middleware chain.
pub struct CommandPipelines {
    pub create_cart: Pipeline<CreateCart, CartService>,
    pub add_item: Pipeline<AddItemToCart, CartService>,
    pub change_quantity: Pipeline<ChangeItemQuantity, CartService>,
    pub remove_item: Pipeline<RemoveItemFromCart, CartService>,
    pub checkout: Pipeline<CheckoutCart, CartService>,
    pub create_product: Pipeline<CreateProduct, CatalogService>,
    pub change_price: Pipeline<ChangeProductPrice, CatalogService>,
    pub discontinue_product: Pipeline<DiscontinueProduct, CatalogService>,
}

impl CommandPipelines {
    pub fn new(carts: Arc<CartService>, catalog: Arc<CatalogService>, slow: Duration) -> Self {
        Self {
            create_cart: Pipeline::builder(carts.clone())
                .rules(CreateCart::rules())
                .slow_threshold(slow)
                .build(),
            add_item: Pipeline::builder(carts.clone())
                .rules(AddItemToCart::rules())
                .slow_threshold(slow)
                .build(),
            change_quantity: Pipeline::builder(carts.clone())
                .rules(ChangeItemQuantity::rules())
                .slow_threshold(slow)
                .build(),
            remove_item: Pipeline::builder(carts.clone()).slow_threshold(slow).build(),
            checkout: Pipeline::builder(carts).slow_threshold(slow).build(),
            create_product: Pipeline::builder(catalog.clone())
                .rules(CreateProduct::rules())
                .slow_threshold(slow)
                .build(),
            change_price: Pipeline::builder(catalog.clone())
                .rules(ChangeProductPrice::rules())
                .slow_threshold(slow)
                .build(),
            discontinue_product: Pipeline::builder(catalog).slow_threshold(slow).build(),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub commands: CommandPipelines,
    pub carts: Arc<CartService>,
    pub catalog: Arc<CatalogService>,
    pub summaries: Arc<CartSummaryProjection>,
    pub dead_letters: DeadLetterManager,
    /// Which [`Stores`] backend is in use.
    pub storage: &'static str,
}

/// Durable collaborators, either all in memory or all in PostgreSQL.
#[derive(Clone)]
pub struct Stores {
    pub kind: &'static str,
    pub aggregates: Arc<dyn AggregateStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub processed: Arc<dyn ProcessedMessages>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            kind: "memory",
            aggregates: Arc::new(InMemoryAggregateStore::new()),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
            processed: Arc::new(InMemoryProcessedMessages::new()),
        }
    }

    pub fn postgres(store: PostgresMessageStore) -> Self {
        let store = Arc::new(store);
        Self {
            kind: "postgres",
            aggregates: store.clone(),
            dead_letters: store.clone(),
            processed: store,
        }
    }
}

/// Application state plus the background tasks that keep it moving.
pub struct Runtime {
    pub state: Arc<AppState>,
    pub relay: OutboxRelay,
    pub worker: ConsumerWorker,
}

/// Wires services, pipelines, the outbox relay and the cart-summary worker
/// around `stores` and `broker`.
pub async fn build_runtime(config: &Config, stores: Stores, broker: Arc<InMemoryBroker>) -> Runtime {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    broker.bind(CART_SUMMARY_QUEUE).await;
    let dispatcher: Arc<dyn EventDispatcher> = Arc::new(ChannelDispatcher::new(broker.clone()));

    let carts = Arc::new(CartService::new(
        stores.aggregates.clone(),
        dispatcher.clone(),
        clock.clone(),
    ));
    let catalog = Arc::new(CatalogService::new(
        stores.aggregates.clone(),
        dispatcher.clone(),
        clock.clone(),
    ));
    let summaries = Arc::new(CartSummaryProjection::new());

    let relay = OutboxRelay::new(
        stores.aggregates.clone(),
        dispatcher,
        clock.clone(),
        config.outbox_relay_grace,
    )
    .with_max_attempts(config.outbox_max_attempts);
    let runner = DeliveryRunner::new(
        summaries.clone(),
        stores.processed.clone(),
        stores.dead_letters.clone(),
        clock,
    )
    .with_policy(RetryPolicy::new(
        config.consumer_max_attempts,
        config.consumer_initial_backoff,
    ));
    let worker = ConsumerWorker::new(CART_SUMMARY_QUEUE, broker.clone(), runner);

    let state = Arc::new(AppState {
        commands: CommandPipelines::new(
            carts.clone(),
            catalog.clone(),
            config.slow_command_threshold,
        ),
        carts,
        catalog,
        summaries,
        dead_letters: DeadLetterManager::new(stores.dead_letters, broker),
        storage: stores.kind,
    });

    Runtime {
        state,
        relay,
        worker,
    }
}
