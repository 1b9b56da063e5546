use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::{Command, CommandRequest, PipelineError};

/// Logs the command name and payload before anything else runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingLayer;

impl<S> Layer<S> for LoggingLayer {
    type Service = Logging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Logging { inner }
    }
}

#[derive(Debug, Clone)]
pub struct Logging<S> {
    inner: S,
}

impl<S, C, E> Service<CommandRequest<C>> for Logging<S>
where
    C: Command,
    S: Service<CommandRequest<C>, Response = C::Response, Error = PipelineError<E>>,
    S::Future: Send + 'static,
    E: Send + 'static,
{
    type Response = C::Response;
    type Error = PipelineError<E>;
    type Future = BoxFuture<'static, Result<C::Response, PipelineError<E>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: CommandRequest<C>) -> Self::Future {
        tracing::info!(
            command = C::NAME,
            correlation_id = %request.context.correlation_id(),
            payload = %request.payload(),
            "handling command"
        );
        metrics::counter!("commands_total", "command" => C::NAME).increment(1);

        if request.context.is_cancelled() {
            tracing::info!(command = C::NAME, "command cancelled before handling");
            return Box::pin(async { Err(PipelineError::Cancelled) });
        }

        Box::pin(self.inner.call(request))
    }
}
