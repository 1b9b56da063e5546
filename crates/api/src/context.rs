//! Per-request command context taken from request headers.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use common::CorrelationId;
use pipeline::RequestContext;

/// Header carrying the caller's correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Extracts a [`RequestContext`], reusing the caller's `x-correlation-id`
/// when it holds a valid id.
#[derive(Debug, Clone)]
pub struct CommandContext(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for CommandContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let supplied = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<CorrelationId>().ok());

        if supplied.is_none() && parts.headers.contains_key(CORRELATION_ID_HEADER) {
            tracing::debug!("Ignoring malformed correlation id header");
        }

        Ok(CommandContext(RequestContext::new(
            CorrelationId::propagate_or_new(supplied),
        )))
    }
}
