//! Catalog application service.

use std::sync::Arc;

use async_trait::async_trait;
use common::Clock;
use message_store::AggregateStore;
use pipeline::{CommandHandler, RequestContext};

use crate::dispatcher::EventDispatcher;
use crate::error::DomainError;
use crate::event::EventContext;
use crate::repository;
use crate::unit_of_work::UnitOfWork;
use crate::value_objects::{Currency, Money, Price};

use super::{
    CatalogError, ChangeProductPrice, CreateProduct, DiscontinueProduct, Product, ProductId,
    ProductView,
};

/// Service for managing catalog products.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn AggregateStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
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

    #[tracing::instrument(skip(self))]
    pub async fn get_product(
        &self,
        product_id: ProductId,
    ) -> Result<Option<ProductView>, DomainError> {
        let product = repository::load::<Product>(self.store.as_ref(), product_id).await?;
        Ok(product.as_ref().map(ProductView::from))
    }

    fn event_context(&self, context: &RequestContext) -> EventContext {
        EventContext::new(context.correlation_id(), self.clock.now())
    }

    async fn save(
        &self,
        product: &mut Product,
        context: &RequestContext,
    ) -> Result<ProductView, DomainError> {
        {
            let mut uow = UnitOfWork::new(
                self.store.as_ref(),
                self.dispatcher.as_ref(),
                self.clock.as_ref(),
            );
            uow.track(&mut *product)?;
            uow.commit(context.cancellation()).await?;
        }
        Ok(ProductView::from(&*product))
    }
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandHandler<CreateProduct> for CatalogService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(product_id = %command.product_id))]
    async fn handle(
        &self,
        command: CreateProduct,
        context: &RequestContext,
    ) -> Result<ProductView, DomainError> {
        if repository::load::<Product>(self.store.as_ref(), command.product_id)
            .await?
            .is_some()
        {
            return Err(CatalogError::AlreadyExists(command.product_id).into());
        }
        let currency = match command.currency.as_deref() {
            Some(code) => code.parse::<Currency>()?,
            None => Currency::default(),
        };
        let price = Price::new(Money::from_cents(command.price_cents, currency))?;

        let mut product = Product::create(
            command.product_id,
            command.name,
            price,
            &self.event_context(context),
        )?;
        match self.save(&mut product, context).await {
            Err(err) if err.is_concurrency_conflict() => {
                Err(CatalogError::AlreadyExists(command.product_id).into())
            }
            result => result,
        }
    }
}

#[async_trait]
impl CommandHandler<ChangeProductPrice> for CatalogService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(product_id = %command.product_id))]
    async fn handle(
        &self,
        command: ChangeProductPrice,
        context: &RequestContext,
    ) -> Result<ProductView, DomainError> {
        let mut product =
            repository::load_existing::<Product>(self.store.as_ref(), command.product_id).await?;
        let price = Price::new(Money::from_cents(
            command.price_cents,
            product.price().currency(),
        ))?;

        product.change_price(price, &self.event_context(context))?;
        self.save(&mut product, context).await
    }
}

#[async_trait]
impl CommandHandler<DiscontinueProduct> for CatalogService {
    type Error = DomainError;

    #[tracing::instrument(skip(self, context), fields(product_id = %command.product_id))]
    async fn handle(
        &self,
        command: DiscontinueProduct,
        context: &RequestContext,
    ) -> Result<ProductView, DomainError> {
        let mut product =
            repository::load_existing::<Product>(self.store.as_ref(), command.product_id).await?;
        product.discontinue(&self.event_context(context))?;
        self.save(&mut product, context).await
    }
}
