//! Middleware chain wrapped around every command handler.
//!
//! The order is fixed: failure capture (outermost) → logging → timing →
//! validation → handler. Each stage is a [`tower::Layer`], and
//! [`Pipeline`] assembles them so callers cannot reorder them.

pub mod command;
pub mod error;
pub mod handler;
pub mod logging;
pub mod pipeline;
pub mod timing;
pub mod unhandled;
pub mod validation;

pub use command::{Command, CommandHandler, CommandRequest, RequestContext};
pub use error::{FieldError, PipelineError, ReportableError, ValidationErrors};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use timing::DEFAULT_SLOW_THRESHOLD;
pub use tokio_util::sync::CancellationToken;
pub use validation::RuleSet;
