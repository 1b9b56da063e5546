use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;
use crate::catalog::ProductId;
use crate::value_objects::{Money, ValueError};

use super::{BuyerId, Cart, CartId, CartStatus};

/// Read-only projection of a cart returned by the cart commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub id: CartId,
    pub buyer_id: BuyerId,
    pub status: CartStatus,
    pub lines: Vec<CartLineView>,
    pub item_count: u64,
    pub total: Money,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLineView {
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

impl TryFrom<&Cart> for CartView {
    type Error = ValueError;

    fn try_from(cart: &Cart) -> Result<Self, Self::Error> {
        let lines = cart
            .lines()
            .iter()
            .map(|line| {
                Ok(CartLineView {
                    product_id: line.product_id,
                    product_name: line.product_name.clone(),
                    quantity: line.quantity.value(),
                    unit_price: line.unit_price.amount(),
                    line_total: line.line_total()?,
                })
            })
            .collect::<Result<Vec<_>, ValueError>>()?;
        let audit = cart.audit().copied().unwrap_or_default();

        Ok(Self {
            id: cart.id(),
            buyer_id: cart.buyer_id(),
            status: cart.status(),
            lines,
            item_count: cart.item_count(),
            total: cart.total()?,
            created_at: audit.created_at,
            updated_at: audit.updated_at,
        })
    }
}
