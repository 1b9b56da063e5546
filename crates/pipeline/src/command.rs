use std::fmt;

use async_trait::async_trait;
use common::CorrelationId;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::ReportableError;

/// A request to change state, named and serializable so the pipeline can
/// log it.
pub trait Command: Serialize + fmt::Debug + Send + Sync + 'static {
    type Response: Send + 'static;

    /// Stable name used in logs and metrics.
    const NAME: &'static str;
}

/// Per-request ambient data: the correlation id stamped on every event the
/// command raises, and the caller's cancellation signal.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(CorrelationId::new())
    }
}

/// A command travelling through the pipeline together with its context.
#[derive(Debug)]
pub struct CommandRequest<C> {
    pub command: C,
    pub context: RequestContext,
}

impl<C: Command> CommandRequest<C> {
    pub fn new(command: C, context: RequestContext) -> Self {
        Self { command, context }
    }

    /// The command rendered as JSON for log lines.
    pub fn payload(&self) -> String {
        serde_json::to_string(&self.command)
            .unwrap_or_else(|err| format!("<unserializable {}: {err}>", C::NAME))
    }
}

/// The business handler at the centre of the pipeline.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    type Error: ReportableError + Send + Sync + 'static;

    async fn handle(
        &self,
        command: C,
        context: &RequestContext,
    ) -> Result<C::Response, Self::Error>;
}
