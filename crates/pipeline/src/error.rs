use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classification the pipeline uses to pick a log level for handler errors.
pub trait ReportableError: std::error::Error {
    /// `true` for defects and outages, `false` for expected business
    /// outcomes such as "not found" or a rejected state transition.
    fn is_unexpected(&self) -> bool {
        true
    }
}

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every rule that failed for one command, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("{}", render(.0))]
pub struct ValidationErrors(Vec<FieldError>);

fn render(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Vec<FieldError> {
        self.0
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

/// Outcome of a command that did not produce a response.
#[derive(Debug)]
pub enum PipelineError<E> {
    /// Rejected before the handler ran.
    Validation(ValidationErrors),
    /// The caller cancelled before the handler ran.
    Cancelled,
    /// The handler itself failed.
    Handler(E),
}

impl<E> PipelineError<E> {
    pub fn handler_error(&self) -> Option<&E> {
        match self {
            PipelineError::Handler(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for PipelineError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Validation(errors) => write!(f, "validation failed: {errors}"),
            PipelineError::Cancelled => f.write_str("command cancelled before reaching its handler"),
            PipelineError::Handler(err) => err.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PipelineError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Validation(errors) => Some(errors),
            PipelineError::Cancelled => None,
            PipelineError::Handler(err) => err.source(),
        }
    }
}
