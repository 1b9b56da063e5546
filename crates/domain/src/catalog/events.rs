//! Catalog domain events.

use serde::{Deserialize, Serialize};

use crate::event::EventPayload;
use crate::value_objects::Price;

use super::ProductId;

/// Events that can occur on a product aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    ProductCreated(ProductCreatedData),
    ProductPriceChanged(ProductPriceChangedData),
    ProductDiscontinued(ProductDiscontinuedData),
}

impl EventPayload for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "ProductCreated",
            ProductEvent::ProductPriceChanged(_) => "ProductPriceChanged",
            ProductEvent::ProductDiscontinued(_) => "ProductDiscontinued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCreatedData {
    pub product_id: ProductId,
    pub name: String,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPriceChangedData {
    pub product_id: ProductId,
    pub previous_price: Price,
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDiscontinuedData {
    pub product_id: ProductId,
}
