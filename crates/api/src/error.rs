//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use consumers::RetryDeadLetterError;
use domain::DomainError;
use pipeline::{FieldError, PipelineError, ValidationErrors};
use serde::Serialize;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// One or more command fields failed validation.
    #[error("validation failed")]
    Validation(ValidationErrors),

    /// Well-formed input that a domain rule rejects.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The request conflicts with the current state of the resource.
    #[error("{0}")]
    Conflict(String),

    /// Logged with its detail; the client gets a generic message.
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a [FieldError]>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match &self {
            ApiError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "validation failed",
                Some(errors.fields()),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.as_str(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str(), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.as_str(), None),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error", None)
            }
        };

        let body = ErrorBody {
            error: message,
            fields,
        };
        (status, Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        if err.is_not_found() {
            ApiError::NotFound(err.to_string())
        } else if err.is_conflict() {
            ApiError::Conflict(err.to_string())
        } else if err.is_invalid() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<PipelineError<DomainError>> for ApiError {
    fn from(err: PipelineError<DomainError>) -> Self {
        match err {
            PipelineError::Validation(errors) => ApiError::Validation(errors),
            PipelineError::Cancelled => ApiError::Internal("request cancelled".to_string()),
            PipelineError::Handler(err) => err.into(),
        }
    }
}

impl From<RetryDeadLetterError> for ApiError {
    fn from(err: RetryDeadLetterError) -> Self {
        if err.is_not_found() {
            ApiError::NotFound(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}
