use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateRoot, AuditStamp, EventQueue};
use crate::event::{DomainEvent, EventContext};
use crate::value_objects::{Price, ValueError};

use super::{
    CatalogError, ProductId,
    events::{ProductCreatedData, ProductDiscontinuedData, ProductEvent, ProductPriceChangedData},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Active,
    Discontinued,
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductStatus::Active => f.write_str("active"),
            ProductStatus::Discontinued => f.write_str("discontinued"),
        }
    }
}

/// Product aggregate root.
#[derive(Debug, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    name: String,
    price: Price,
    status: ProductStatus,
    #[serde(default)]
    audit: AuditStamp,
    #[serde(skip)]
    version: i64,
    #[serde(skip)]
    events: EventQueue<DomainEvent<ProductEvent>>,
}

impl AggregateRoot for Product {
    type Id = ProductId;
    type Event = ProductEvent;
    const AGGREGATE_TYPE: &'static str = "Product";

    fn id(&self) -> ProductId {
        self.id
    }

    fn events(&self) -> &EventQueue<DomainEvent<ProductEvent>> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<DomainEvent<ProductEvent>> {
        &mut self.events
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn audit(&self) -> Option<&AuditStamp> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut AuditStamp> {
        Some(&mut self.audit)
    }
}

impl Product {
    pub fn create(
        id: ProductId,
        name: String,
        price: Price,
        context: &EventContext,
    ) -> Result<Self, CatalogError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::BlankName);
        }

        let mut product = Self {
            id,
            name: name.clone(),
            price,
            status: ProductStatus::Active,
            audit: AuditStamp::default(),
            version: 0,
            events: EventQueue::new(),
        };
        product.add_domain_event(context.raise(ProductEvent::ProductCreated(ProductCreatedData {
            product_id: id,
            name,
            price,
        })));
        Ok(product)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Reprices the product. Setting the current price again is a no-op
    /// and raises nothing.
    pub fn change_price(&mut self, price: Price, context: &EventContext) -> Result<(), CatalogError> {
        self.ensure_active()?;
        if price.currency() != self.price.currency() {
            return Err(ValueError::CurrencyMismatch {
                left: self.price.currency(),
                right: price.currency(),
            }
            .into());
        }
        if price == self.price {
            return Ok(());
        }

        let previous_price = self.price;
        self.price = price;
        self.add_domain_event(context.raise(ProductEvent::ProductPriceChanged(
            ProductPriceChangedData {
                product_id: self.id,
                previous_price,
                price,
            },
        )));
        Ok(())
    }

    pub fn discontinue(&mut self, context: &EventContext) -> Result<(), CatalogError> {
        self.ensure_active()?;
        self.status = ProductStatus::Discontinued;
        self.add_domain_event(context.raise(ProductEvent::ProductDiscontinued(
            ProductDiscontinuedData {
                product_id: self.id,
            },
        )));
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), CatalogError> {
        match self.status {
            ProductStatus::Active => Ok(()),
            ProductStatus::Discontinued => Err(CatalogError::Discontinued(self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{Currency, Money};
    use chrono::Utc;
    use common::CorrelationId;

    fn context() -> EventContext {
        EventContext::new(CorrelationId::new(), Utc::now())
    }

    fn usd(cents: i64) -> Price {
        Price::new(Money::usd(cents)).unwrap()
    }

    fn product() -> Product {
        Product::create(ProductId::new(), "  Lamp ".into(), usd(2500), &context()).unwrap()
    }

    #[test]
    fn create_trims_the_name_and_raises_one_event() {
        let product = product();
        assert_eq!(product.name(), "Lamp");
        assert_eq!(product.pending_events().len(), 1);
        assert_eq!(product.pending_events()[0].event_type(), "ProductCreated");
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = Product::create(ProductId::new(), "  ".into(), usd(1), &context()).unwrap_err();
        assert_eq!(err, CatalogError::BlankName);
    }

    #[test]
    fn change_price_records_the_previous_price() {
        let mut product = product();
        product.clear_events();

        product.change_price(usd(1999), &context()).unwrap();

        assert_eq!(product.price(), usd(1999));
        match product.pending_events()[0].payload() {
            ProductEvent::ProductPriceChanged(data) => {
                assert_eq!(data.previous_price, usd(2500));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn same_price_raises_nothing() {
        let mut product = product();
        product.clear_events();

        product.change_price(usd(2500), &context()).unwrap();
        assert!(product.pending_events().is_empty());
    }

    #[test]
    fn currency_cannot_change() {
        let mut product = product();
        let euro = Price::new(Money::from_cents(100, Currency::Eur)).unwrap();
        assert!(matches!(
            product.change_price(euro, &context()),
            Err(CatalogError::Value(ValueError::CurrencyMismatch { .. }))
        ));
    }

    #[test]
    fn discontinued_products_are_frozen() {
        let mut product = product();
        product.discontinue(&context()).unwrap();

        assert_eq!(product.status(), ProductStatus::Discontinued);
        assert!(product.discontinue(&context()).unwrap_err().is_conflict());
        assert!(product.change_price(usd(1), &context()).is_err());
    }
}
