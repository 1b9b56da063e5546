//! Cart application service: loads a cart, runs one aggregate method and
//! commits through a unit of work.

use std::sync::Arc;

use async_trait::async_trait;
use common::Clock;
use message_store::AggregateStore;
use pipeline::{CommandHandler, RequestContext};

use crate::aggregate::AggregateRoot;
use crate::dispatcher::EventDispatcher;
use crate::error::DomainError;
use crate::event::EventContext;
use crate::repository;
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::{Currency, Money, Price, Quantity};

use super::{
    AddItemToCart, Cart, CartError, CartId, CartView, ChangeItemQuantity, CheckoutCart,
    CreateCart, RemoveItemFromCart,
};

/// Service for managing carts.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn AggregateStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    clock: Arc<dyn Clock>,
}

impl CartService {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        dispatcher: Arc<dyn EventDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            clock,
        }
    }

    /// Loads a cart by ID.
    ///
    /// Returns None if the cart doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_cart(&self, cart_id: CartId) -> Result<Option<CartView>, DomainError> {
        match repository::load::<Cart>(self.store.as_ref(), cart_id).await? {
            Some(cart) => Ok(Some(CartView::try_from(&cart)?)),
            None => Ok(None),
        }
    }

    fn event_context(&self, context: &RequestContext) -> EventContext {
        EventContext::new(context.correlation_id(), self.clock.now())
    }

    async fn load(&self, cart_id: CartId) -> Result<Cart, DomainError> {
        repository::load_existing::<Cart>(self.store.as_ref(), cart_id).await
    }

    async fn save(&self, cart: &mut Cart, context: &RequestContext) -> Result<CartView, DomainError> {
        {
            let mut uow = UnitOfWork::new(
                self.store.as_ref(),
                self.dispatcher.as_ref(),
                self.clock.as_ref(),
            );
            uow.track(&mut *cart)?;
            uow.commit(context.cancellation()).await?;
        }
        Ok(CartView::try_from(&*cart)?)
    }

    fn unit_price(cart: &Cart, cents: i64) -> Result<Price, DomainError> {
        Ok(Price::new(Money::from_cents(cents, cart.currency()))?)
    }
}

impl std::fmt::Debug for CartService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartService").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandHandler<CreateCart> for CartService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(cart_id = %command.cart_id))]
    async fn handle(
        &self,
        command: CreateCart,
        context: &RequestContext,
    ) -> Result<CartView, DomainError> {
        if repository::load::<Cart>(self.store.as_ref(), command.cart_id)
            .await?
            .is_some()
        {
            return Err(CartError::AlreadyExists(command.cart_id).into());
        }
        let currency = match command.currency.as_deref() {
            Some(code) => code.parse::<Currency>()?,
            None => Currency::default(),
        };

        let mut cart = Cart::create_in(
            command.cart_id,
            command.buyer_id,
            currency,
            &self.event_context(context),
        );
        match self.save(&mut cart, context).await {
            Err(err) if err.is_concurrency_conflict() => {
                Err(CartError::AlreadyExists(command.cart_id).into())
            }
            result => result,
        }
    }
}

#[async_trait]
impl CommandHandler<AddItemToCart> for CartService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(cart_id = %command.cart_id))]
    async fn handle(
        &self,
        command: AddItemToCart,
        context: &RequestContext,
    ) -> Result<CartView, DomainError> {
        let mut cart = self.load(command.cart_id).await?;
        let unit_price = Self::unit_price(&cart, command.unit_price_cents)?;

        cart.add_item(
            command.product_id,
            command.product_name,
            Quantity::new(command.quantity)?,
            unit_price,
            &self.event_context(context),
        )?;
        self.save(&mut cart, context).await
    }
}

#[async_trait]
impl CommandHandler<ChangeItemQuantity> for CartService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(cart_id = %command.cart_id))]
    async fn handle(
        &self,
        command: ChangeItemQuantity,
        context: &RequestContext,
    ) -> Result<CartView, DomainError> {
        let mut cart = self.load(command.cart_id).await?;
        cart.change_item_quantity(
            command.product_id,
            Quantity::new(command.quantity)?,
            &self.event_context(context),
        )?;
        self.save(&mut cart, context).await
    }
}

#[async_trait]
impl CommandHandler<RemoveItemFromCart> for CartService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(cart_id = %command.cart_id))]
    async fn handle(
        &self,
        command: RemoveItemFromCart,
        context: &RequestContext,
    ) -> Result<CartView, DomainError> {
        let mut cart = self.load(command.cart_id).await?;
        cart.remove_item(command.product_id, &self.event_context(context))?;
        self.save(&mut cart, context).await
    }
}

#[async_trait]
impl CommandHandler<CheckoutCart> for CartService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(cart_id = %command.cart_id))]
    async fn handle(
        &self,
        command: CheckoutCart,
        context: &RequestContext,
    ) -> Result<CartView, DomainError> {
        let mut cart = self.load(command.cart_id).await?;
        cart.checkout(&self.event_context(context))?;
        let view = self.save(&mut cart, context).await?;
        tracing::info!(cart_id = %cart.id(), total = %view.total, "Cart checked out");
        Ok(view)
    }
}
