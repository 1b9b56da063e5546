//! Dead-letter inspection and replay.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use consumers::RetryReceipt;
use message_store::DeadLetterRecord;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

/// GET /dead-letters/{queue}?limit=N
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DeadLetterRecord>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Ok(Json(state.dead_letters.list(&queue, limit).await?))
}

/// POST /dead-letters/{queue}/{sequence}/retry: resubmit one parked message.
#[tracing::instrument(skip(state))]
pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path((queue, sequence)): Path<(String, i64)>,
) -> Result<(StatusCode, Json<RetryReceipt>), ApiError> {
    let receipt = state
        .dead_letters
        .retry_dead_letter(&queue, sequence)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
