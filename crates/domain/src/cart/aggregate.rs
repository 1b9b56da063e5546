//! Cart aggregate implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateRoot, AuditStamp, EventQueue};
use crate::catalog::ProductId;
use crate::event::{DomainEvent, EventContext};
use crate::value_objects::{Currency, Money, Price, Quantity, ValueError};

use super::{
    BuyerId, CartError, CartEvent, CartId,
    events::{
        CartCheckedOutData, CartCreatedData, ItemQuantityChangedData, ProductAddedData,
        ProductRemovedData,
    },
};

/// Where a cart is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[default]
    Open,
    CheckedOut,
}

impl fmt::Display for CartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartStatus::Open => f.write_str("open"),
            CartStatus::CheckedOut => f.write_str("checked out"),
        }
    }
}

/// One product in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: Option<String>,
    pub quantity: Quantity,
    pub unit_price: Price,
}

impl CartLine {
    pub fn line_total(&self) -> Result<Money, ValueError> {
        self.unit_price.total_for(self.quantity)
    }
}

/// Cart aggregate root.
///
/// Holds at most one line per product; adding a product that is already in
/// the cart merges into its line. Every mutating call raises exactly one
/// event.
#[derive(Debug, Serialize, Deserialize)]
pub struct Cart {
    id: CartId,
    buyer_id: BuyerId,
    #[serde(default)]
    currency: Currency,
    status: CartStatus,
    lines: Vec<CartLine>,
    #[serde(default)]
    audit: AuditStamp,
    #[serde(skip)]
    version: i64,
    #[serde(skip)]
    events: EventQueue<DomainEvent<CartEvent>>,
}

impl AggregateRoot for Cart {
    type Id = CartId;
    type Event = CartEvent;
    const AGGREGATE_TYPE: &'static str = "Cart";

    fn id(&self) -> CartId {
        self.id
    }

    fn events(&self) -> &EventQueue<DomainEvent<CartEvent>> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<DomainEvent<CartEvent>> {
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

impl Cart {
    /// Opens a new USD cart for `buyer_id`.
    pub fn create(id: CartId, buyer_id: BuyerId, context: &EventContext) -> Self {
        Self::create_in(id, buyer_id, Currency::default(), context)
    }

    /// Opens a new cart priced in `currency`.
    pub fn create_in(
        id: CartId,
        buyer_id: BuyerId,
        currency: Currency,
        context: &EventContext,
    ) -> Self {
        let mut cart = Self {
            id,
            buyer_id,
            currency,
            status: CartStatus::Open,
            lines: Vec::new(),
            audit: AuditStamp::default(),
            version: 0,
            events: EventQueue::new(),
        };
        cart.record(
            context,
            CartEvent::CartCreated(CartCreatedData {
                cart_id: id,
                buyer_id,
                currency,
            }),
        );
        cart
    }

    pub fn buyer_id(&self) -> BuyerId {
        self.buyer_id
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn status(&self) -> CartStatus {
        self.status
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn line(&self, product_id: ProductId) -> Option<&CartLine> {
        self.lines.iter().find(|line| line.product_id == product_id)
    }

    pub fn item_count(&self) -> u64 {
        self.lines
            .iter()
            .map(|line| u64::from(line.quantity.value()))
            .sum()
    }

    pub fn total(&self) -> Result<Money, ValueError> {
        self.lines
            .iter()
            .try_fold(Money::zero(self.currency), |total, line| {
                total.checked_add(line.line_total()?)
            })
    }

    /// Adds `quantity` units, merging into an existing line for the product.
    /// The line takes the most recent unit price.
    pub fn add_item(
        &mut self,
        product_id: ProductId,
        product_name: Option<String>,
        quantity: Quantity,
        unit_price: Price,
        context: &EventContext,
    ) -> Result<(), CartError> {
        self.ensure_open("add items to")?;
        if quantity.is_zero() {
            return Err(CartError::InvalidQuantity { quantity: 0 });
        }
        if unit_price.currency() != self.currency {
            return Err(ValueError::CurrencyMismatch {
                left: self.currency,
                right: unit_price.currency(),
            }
            .into());
        }

        let line_quantity = match self.line(product_id) {
            Some(line) => line.quantity.checked_add(quantity)?,
            None => quantity,
        };
        unit_price.total_for(line_quantity)?;

        self.record(
            context,
            CartEvent::ProductAddedToCart(ProductAddedData {
                cart_id: self.id,
                product_id,
                quantity,
                unit_price,
                line_quantity,
                product_name,
            }),
        );
        Ok(())
    }

    /// Sets a line's quantity. Use [`Cart::remove_item`] to drop a line.
    pub fn change_item_quantity(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
        context: &EventContext,
    ) -> Result<(), CartError> {
        self.ensure_open("change items in")?;
        if quantity.is_zero() {
            return Err(CartError::InvalidQuantity { quantity: 0 });
        }
        let line = self
            .line(product_id)
            .ok_or(CartError::ItemNotFound { product_id })?;
        line.unit_price.total_for(quantity)?;
        let previous_quantity = line.quantity;

        self.record(
            context,
            CartEvent::CartItemQuantityChanged(ItemQuantityChangedData {
                cart_id: self.id,
                product_id,
                previous_quantity,
                quantity,
            }),
        );
        Ok(())
    }

    pub fn remove_item(
        &mut self,
        product_id: ProductId,
        context: &EventContext,
    ) -> Result<(), CartError> {
        self.ensure_open("remove items from")?;
        let quantity = self
            .line(product_id)
            .map(|line| line.quantity)
            .ok_or(CartError::ItemNotFound { product_id })?;

        self.record(
            context,
            CartEvent::ProductRemovedFromCart(ProductRemovedData {
                cart_id: self.id,
                product_id,
                quantity,
            }),
        );
        Ok(())
    }

    pub fn checkout(&mut self, context: &EventContext) -> Result<(), CartError> {
        self.ensure_open("check out")?;
        if self.lines.is_empty() {
            return Err(CartError::Empty);
        }
        let total = self.total()?;

        self.record(
            context,
            CartEvent::CartCheckedOut(CartCheckedOutData {
                cart_id: self.id,
                buyer_id: self.buyer_id,
                total,
                line_count: self.lines.len() as u32,
            }),
        );
        Ok(())
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), CartError> {
        if self.status == CartStatus::Open {
            Ok(())
        } else {
            Err(CartError::InvalidStateTransition {
                status: self.status,
                action,
            })
        }
    }

    fn record(&mut self, context: &EventContext, payload: CartEvent) {
        self.apply(&payload);
        self.add_domain_event(context.raise(payload));
    }

    /// Applies an already validated event to the state. Must not fail.
    fn apply(&mut self, event: &CartEvent) {
        match event {
            CartEvent::CartCreated(_) => {}
            CartEvent::ProductAddedToCart(data) => {
                match self
                    .lines
                    .iter_mut()
                    .find(|line| line.product_id == data.product_id)
                {
                    Some(line) => {
                        line.quantity = data.line_quantity;
                        line.unit_price = data.unit_price;
                        if data.product_name.is_some() {
                            line.product_name = data.product_name.clone();
                        }
                    }
                    None => self.lines.push(CartLine {
                        product_id: data.product_id,
                        product_name: data.product_name.clone(),
                        quantity: data.line_quantity,
                        unit_price: data.unit_price,
                    }),
                }
            }
            CartEvent::CartItemQuantityChanged(data) => {
                if let Some(line) = self
                    .lines
                    .iter_mut()
                    .find(|line| line.product_id == data.product_id)
                {
                    line.quantity = data.quantity;
                }
            }
            CartEvent::ProductRemovedFromCart(data) => {
                self.lines.retain(|line| line.product_id != data.product_id);
            }
            CartEvent::CartCheckedOut(_) => {
                self.status = CartStatus::CheckedOut;
            }
        }
    }
}
