//! Cart domain events.
//!
//! Each variant's data struct is part of the wire schema. Fields added after
//! a variant's first version are `Option` with a serde default.

use serde::{Deserialize, Serialize};

use crate::catalog::ProductId;
use crate::event::EventPayload;
use crate::value_objects::{Currency, Money, Price, Quantity};

use super::{BuyerId, CartId};

/// Events that can occur on a cart aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CartEvent {
    /// Cart was created.
    CartCreated(CartCreatedData),

    /// A product was added, either as a new line or onto an existing one.
    ProductAddedToCart(ProductAddedData),

    /// A line's quantity was set.
    CartItemQuantityChanged(ItemQuantityChangedData),

    /// A line was removed.
    ProductRemovedFromCart(ProductRemovedData),

    /// Cart was checked out and is now read-only.
    CartCheckedOut(CartCheckedOutData),
}

impl EventPayload for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartCreated(_) => "CartCreated",
            CartEvent::ProductAddedToCart(_) => "ProductAddedToCart",
            CartEvent::CartItemQuantityChanged(_) => "CartItemQuantityChanged",
            CartEvent::ProductRemovedFromCart(_) => "ProductRemovedFromCart",
            CartEvent::CartCheckedOut(_) => "CartCheckedOut",
        }
    }

    fn schema_version(&self) -> u16 {
        match self {
            // v2 added `product_name`
            CartEvent::ProductAddedToCart(_) => 2,
            _ => 1,
        }
    }
}

impl CartEvent {
    pub fn cart_id(&self) -> CartId {
        match self {
            CartEvent::CartCreated(data) => data.cart_id,
            CartEvent::ProductAddedToCart(data) => data.cart_id,
            CartEvent::CartItemQuantityChanged(data) => data.cart_id,
            CartEvent::ProductRemovedFromCart(data) => data.cart_id,
            CartEvent::CartCheckedOut(data) => data.cart_id,
        }
    }
}

/// Data for CartCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartCreatedData {
    pub cart_id: CartId,
    pub buyer_id: BuyerId,
    #[serde(default)]
    pub currency: Currency,
}

/// Data for ProductAddedToCart event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAddedData {
    pub cart_id: CartId,
    pub product_id: ProductId,

    /// Units added by this call.
    pub quantity: Quantity,

    pub unit_price: Price,

    /// Quantity of the line after the add.
    pub line_quantity: Quantity,

    #[serde(default)]
    pub product_name: Option<String>,
}

/// Data for CartItemQuantityChanged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemQuantityChangedData {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub previous_quantity: Quantity,
    pub quantity: Quantity,
}

/// Data for ProductRemovedFromCart event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRemovedData {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: Quantity,
}

/// Data for CartCheckedOut event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartCheckedOutData {
    pub cart_id: CartId,
    pub buyer_id: BuyerId,
    pub total: Money,
    pub line_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_adjacently_tagged() {
        let event = CartEvent::ProductRemovedFromCart(ProductRemovedData {
            cart_id: CartId::new(),
            product_id: ProductId::new(),
            quantity: Quantity::new(1).unwrap(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ProductRemovedFromCart");
        assert_eq!(json["data"]["quantity"], 1);
    }

    #[test]
    fn version_one_product_added_payload_still_reads() {
        let cart_id = CartId::new();
        let product_id = ProductId::new();
        let v1 = serde_json::json!({
            "type": "ProductAddedToCart",
            "data": {
                "cart_id": cart_id,
                "product_id": product_id,
                "quantity": 2,
                "unit_price": {"cents": 999, "currency": "USD"},
                "line_quantity": 2
            }
        });

        let event: CartEvent = serde_json::from_value(v1).unwrap();
        match event {
            CartEvent::ProductAddedToCart(data) => {
                assert_eq!(data.product_name, None);
                assert_eq!(data.line_quantity, Quantity::new(2).unwrap());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn schema_versions() {
        let added = CartEvent::ProductAddedToCart(ProductAddedData {
            cart_id: CartId::new(),
            product_id: ProductId::new(),
            quantity: Quantity::new(1).unwrap(),
            unit_price: Price::new(Money::usd(100)).unwrap(),
            line_quantity: Quantity::new(1).unwrap(),
            product_name: None,
        });
        let created = CartEvent::CartCreated(CartCreatedData {
            cart_id: CartId::new(),
            buyer_id: BuyerId::new(),
            currency: Currency::Usd,
        });

        assert_eq!(added.schema_version(), 2);
        assert_eq!(created.schema_version(), 1);
    }

    #[test]
    fn nil_cart_id_in_payload_is_rejected() {
        let json = serde_json::json!({
            "type": "CartCreated",
            "data": {
                "cart_id": "00000000-0000-0000-0000-000000000000",
                "buyer_id": BuyerId::new(),
            }
        });
        assert!(serde_json::from_value::<CartEvent>(json).is_err());
    }
}
