//! Shopping cart aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod view;

pub use aggregate::{Cart, CartLine, CartStatus};
pub use commands::*;
pub use events::{
    CartCheckedOutData, CartCreatedData, CartEvent, ItemQuantityChangedData, ProductAddedData,
    ProductRemovedData,
};
pub use service::CartService;
pub use view::{CartLineView, CartView};

use thiserror::Error;

use crate::catalog::ProductId;
use crate::value_objects::ValueError;

common::typed_id!(
    /// Identifier of a shopping cart.
    CartId
);

common::typed_id!(
    /// Identifier of the buyer who owns a cart.
    BuyerId
);

/// Errors that can occur during cart operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// A cart with this id already exists.
    #[error("Cart already exists: {0}")]
    AlreadyExists(CartId),

    /// Cart is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} a {status} cart")]
    InvalidStateTransition {
        status: CartStatus,
        action: &'static str,
    },

    /// No line for this product.
    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: ProductId },

    /// Line quantities must be at least one.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Checkout needs at least one line.
    #[error("Cart has no items")]
    Empty,

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl CartError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CartError::ItemNotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CartError::AlreadyExists(_) | CartError::InvalidStateTransition { .. } | CartError::Empty
        )
    }
}
