//! Cart command and query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{
    AddItemToCart, BuyerId, CartId, CartView, ChangeItemQuantity, CheckoutCart, CreateCart,
    ProductId, ProductStatus,
};
use serde::Deserialize;

use crate::context::CommandContext;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateCartRequest {
    pub buyer_id: Option<BuyerId>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Taken from the catalog when omitted.
    pub unit_price_cents: Option<i64>,
    pub product_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeQuantityRequest {
    pub quantity: i64,
}

// -- Handlers --

/// POST /carts: open a cart for a buyer.
#[tracing::instrument(skip(state, context, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    CommandContext(context): CommandContext,
    Json(req): Json<CreateCartRequest>,
) -> Result<(StatusCode, Json<CartView>), ApiError> {
    let mut command = CreateCart::new(req.buyer_id.unwrap_or_default());
    command.currency = req.currency;
    let view = state.commands.create_cart.send(command, context).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /carts/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CartId>,
) -> Result<Json<CartView>, ApiError> {
    state
        .carts
        .get_cart(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Cart {id} not found")))
}

/// POST /carts/{id}/items: add a product, merging into an existing line.
#[tracing::instrument(skip(state, context, req))]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CartId>,
    CommandContext(context): CommandContext,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartView>, ApiError> {
    let (unit_price_cents, product_name) = match req.unit_price_cents {
        Some(cents) => (cents, req.product_name),
        None => {
            let product = state
                .catalog
                .get_product(req.product_id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("Product {} not found", req.product_id)))?;
            if product.status == ProductStatus::Discontinued {
                return Err(ApiError::Conflict(format!(
                    "Product {} is discontinued",
                    product.id
                )));
            }
            (
                product.price.cents(),
                req.product_name.or(Some(product.name)),
            )
        }
    };

    let mut command = AddItemToCart::new(id, req.product_id, req.quantity, unit_price_cents);
    command.product_name = product_name;
    Ok(Json(state.commands.add_item.send(command, context).await?))
}

/// PUT /carts/{id}/items/{product_id}: set a line's quantity.
#[tracing::instrument(skip(state, context, req))]
pub async fn change_quantity(
    State(state): State<Arc<AppState>>,
    Path((id, product_id)): Path<(CartId, ProductId)>,
    CommandContext(context): CommandContext,
    Json(req): Json<ChangeQuantityRequest>,
) -> Result<Json<CartView>, ApiError> {
    let command = ChangeItemQuantity::new(id, product_id, req.quantity);
    Ok(Json(state.commands.change_quantity.send(command, context).await?))
}

/// DELETE /carts/{id}/items/{product_id}
#[tracing::instrument(skip(state, context))]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((id, product_id)): Path<(CartId, ProductId)>,
    CommandContext(context): CommandContext,
) -> Result<Json<CartView>, ApiError> {
    let command = domain::RemoveItemFromCart::new(id, product_id);
    Ok(Json(state.commands.remove_item.send(command, context).await?))
}

/// POST /carts/{id}/checkout
#[tracing::instrument(skip(state, context))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CartId>,
    CommandContext(context): CommandContext,
) -> Result<Json<CartView>, ApiError> {
    Ok(Json(
        state
            .commands
            .checkout
            .send(CheckoutCart::new(id), context)
            .await?,
    ))
}
