//! Read-model endpoint fed by the cart-summary consumer.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use consumers::CartSummary;
use domain::CartId;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /cart-summaries/{id}: eventually consistent with the cart itself.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CartId>,
) -> Result<Json<CartSummary>, ApiError> {
    state
        .summaries
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No summary for cart {id}")))
}
