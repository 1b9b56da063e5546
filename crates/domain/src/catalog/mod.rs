//! Catalog product aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod view;

pub use aggregate::{Product, ProductStatus};
pub use commands::*;
pub use events::{ProductCreatedData, ProductDiscontinuedData, ProductEvent, ProductPriceChangedData};
pub use service::CatalogService;
pub use view::ProductView;

use thiserror::Error;

use crate::value_objects::ValueError;

common::typed_id!(
    /// Identifier of a catalog product. Carts refer to products by this id.
    ProductId
);

/// Errors that can occur during catalog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Product already exists: {0}")]
    AlreadyExists(ProductId),

    /// Discontinued products accept no further changes.
    #[error("Product is discontinued: {0}")]
    Discontinued(ProductId),

    #[error("Product name must not be blank")]
    BlankName,

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl CatalogError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CatalogError::AlreadyExists(_) | CatalogError::Discontinued(_)
        )
    }
}
