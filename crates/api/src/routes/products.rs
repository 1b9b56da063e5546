//! Catalog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::{ChangeProductPrice, CreateProduct, DiscontinueProduct, ProductId, ProductView};
use serde::Deserialize;

use crate::context::CommandContext;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub price_cents: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePriceRequest {
    pub price_cents: i64,
}

/// POST /products
#[tracing::instrument(skip(state, context, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    CommandContext(context): CommandContext,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductView>), ApiError> {
    let mut command = CreateProduct::new(req.name, req.price_cents);
    command.currency = req.currency;
    let view = state.commands.create_product.send(command, context).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /products/{id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProductId>,
) -> Result<Json<ProductView>, ApiError> {
    state
        .catalog
        .get_product(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Product {id} not found")))
}

/// PUT /products/{id}/price
#[tracing::instrument(skip(state, context, req))]
pub async fn change_price(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProductId>,
    CommandContext(context): CommandContext,
    Json(req): Json<ChangePriceRequest>,
) -> Result<Json<ProductView>, ApiError> {
    let command = ChangeProductPrice::new(id, req.price_cents);
    Ok(Json(state.commands.change_price.send(command, context).await?))
}

/// POST /products/{id}/discontinue
#[tracing::instrument(skip(state, context))]
pub async fn discontinue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ProductId>,
    CommandContext(context): CommandContext,
) -> Result<Json<ProductView>, ApiError> {
    let command = DiscontinueProduct::new(id);
    Ok(Json(
        state
            .commands
            .discontinue_product
            .send(command, context)
            .await?,
    ))
}
