//! Domain layer: aggregates that accumulate domain events, and the
//! machinery that publishes those events only after their transaction has
//! committed.
//!
//! - [`AggregateRoot`] and [`EventQueue`] for event accumulation
//! - [`UnitOfWork`] for audit stamping, commit and dispatch
//! - [`ChannelDispatcher`] for concurrent fan-out to the publish channel
//! - [`OutboxRelay`] for replaying what dispatch could not deliver
//! - the `cart` and `catalog` aggregates with their command handlers

pub mod aggregate;
pub mod cart;
pub mod catalog;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod outbox;
pub mod repository;
pub mod unit_of_work;
pub mod value_objects;

pub use aggregate::{AggregateRoot, AuditStamp, EventQueue, TrackedAggregate};
pub use cart::{
    AddItemToCart, BuyerId, Cart, CartError, CartEvent, CartId, CartLine, CartService, CartStatus,
    CartView, ChangeItemQuantity, CheckoutCart, CreateCart, RemoveItemFromCart,
};
pub use catalog::{
    CatalogError, CatalogService, ChangeProductPrice, CreateProduct, DiscontinueProduct, Product,
    ProductEvent, ProductId, ProductStatus, ProductView,
};
pub use dispatcher::{
    ChannelDispatcher, DispatchError, DispatchReport, EventDispatcher, PublishFailure,
};
pub use error::DomainError;
pub use event::{DomainEvent, EventContext, EventMetadata, EventPayload};
pub use outbox::{DEFAULT_OUTBOX_MAX_ATTEMPTS, OutboxRelay, RelayReport};
pub use unit_of_work::{CommitError, CommitOutcome, ScopeState, UnitOfWork};
pub use value_objects::{Currency, Money, Price, Quantity, ValueError};
