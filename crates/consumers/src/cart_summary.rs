//! Read model of carts built from cart events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{AggregateRoot, BuyerId, Cart, CartEvent, CartId, CartStatus, Money, ProductId};
use message_store::MessageEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Consumer, ConsumerError};

/// Queue the summary projection reads from.
pub const CART_SUMMARY_QUEUE: &str = "cart-summary";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartSummary {
    pub cart_id: CartId,
    /// Unknown until `CartCreated` is seen.
    pub buyer_id: Option<BuyerId>,
    pub status: CartStatus,
    pub lines: Vec<SummaryLine>,
    pub item_count: u64,
    pub total_cents: i64,
    pub last_event_at: DateTime<Utc>,
}

impl CartSummary {
    fn new(cart_id: CartId, at: DateTime<Utc>) -> Self {
        Self {
            cart_id,
            buyer_id: None,
            status: CartStatus::Open,
            lines: Vec::new(),
            item_count: 0,
            total_cents: 0,
            last_event_at: at,
        }
    }

    fn set_line(&mut self, product_id: ProductId, quantity: u32, unit_price: Option<Money>) {
        match self.lines.iter().position(|l| l.product_id == product_id) {
            Some(index) if quantity == 0 => {
                self.lines.remove(index);
            }
            Some(index) => {
                let line = &mut self.lines[index];
                line.quantity = quantity;
                if let Some(price) = unit_price {
                    line.unit_price = price;
                }
            }
            None => {
                if quantity > 0
                    && let Some(unit_price) = unit_price
                {
                    self.lines.push(SummaryLine {
                        product_id,
                        quantity,
                        unit_price,
                    });
                }
            }
        }
    }

    fn recompute(&mut self) -> Result<(), ConsumerError> {
        self.item_count = self.lines.iter().map(|l| u64::from(l.quantity)).sum();
        self.total_cents = self.lines.iter().try_fold(0i64, |acc, line| {
            line.unit_price
                .cents()
                .checked_mul(i64::from(line.quantity))
                .and_then(|total| acc.checked_add(total))
                .ok_or_else(|| ConsumerError::permanent("cart total overflows"))
        })?;
        Ok(())
    }
}

/// Keeps one [`CartSummary`] per cart.
///
/// Events carry absolute line quantities, so applying the same event twice
/// leaves the summary unchanged.
#[derive(Debug, Clone, Default)]
pub struct CartSummaryProjection {
    summaries: Arc<RwLock<HashMap<CartId, CartSummary>>>,
}

impl CartSummaryProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, cart_id: CartId) -> Option<CartSummary> {
        self.summaries.read().await.get(&cart_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.summaries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Consumer for CartSummaryProjection {
    fn name(&self) -> &'static str {
        CART_SUMMARY_QUEUE
    }

    async fn handle(&self, message: &MessageEnvelope) -> Result<(), ConsumerError> {
        if message.aggregate_type != Cart::AGGREGATE_TYPE {
            debug!(aggregate_type = %message.aggregate_type, "Ignoring non-cart event");
            return Ok(());
        }
        let event: CartEvent = message.decode_payload()?;
        let cart_id = event.cart_id();

        let mut summaries = self.summaries.write().await;
        let mut summary = summaries
            .get(&cart_id)
            .cloned()
            .unwrap_or_else(|| CartSummary::new(cart_id, message.occurred_at));

        match event {
            CartEvent::CartCreated(data) => {
                summary.buyer_id = Some(data.buyer_id);
            }
            CartEvent::ProductAddedToCart(data) => summary.set_line(
                data.product_id,
                data.line_quantity.value(),
                Some(data.unit_price.amount()),
            ),
            CartEvent::CartItemQuantityChanged(data) => {
                summary.set_line(data.product_id, data.quantity.value(), None)
            }
            CartEvent::ProductRemovedFromCart(data) => summary.set_line(data.product_id, 0, None),
            CartEvent::CartCheckedOut(data) => {
                summary.buyer_id = Some(data.buyer_id);
                summary.status = CartStatus::CheckedOut;
            }
        }
        summary.last_event_at = summary.last_event_at.max(message.occurred_at);
        summary.recompute()?;

        summaries.insert(cart_id, summary);
        Ok(())
    }
}
