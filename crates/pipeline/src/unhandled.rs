use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::{Command, CommandRequest, PipelineError, ReportableError};

/// Outermost stage: reports every failure escaping the inner stages with the
/// command name and payload, then passes it on unchanged. Panics are logged
/// and resumed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureUnhandledLayer;

impl<S> Layer<S> for CaptureUnhandledLayer {
    type Service = CaptureUnhandled<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CaptureUnhandled { inner }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureUnhandled<S> {
    inner: S,
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn report_panic(command: &'static str, payload: &str, panic: &(dyn Any + Send)) {
    metrics::counter!("commands_failed_total", "command" => command).increment(1);
    tracing::error!(
        command,
        payload = %payload,
        panic = panic_message(panic),
        "command handler panicked"
    );
}

impl<S, C, E> Service<CommandRequest<C>> for CaptureUnhandled<S>
where
    C: Command,
    S: Service<CommandRequest<C>, Response = C::Response, Error = PipelineError<E>>,
    S::Future: Send + 'static,
    E: ReportableError + Send + 'static,
{
    type Response = C::Response;
    type Error = PipelineError<E>;
    type Future = BoxFuture<'static, Result<C::Response, PipelineError<E>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: CommandRequest<C>) -> Self::Future {
        let payload = request.payload();
        let correlation_id = request.context.correlation_id();
        let inner = &mut self.inner;
        let started = panic::catch_unwind(AssertUnwindSafe(move || inner.call(request)));

        Box::pin(async move {
            let future = match started {
                Ok(future) => future,
                Err(panic) => {
                    report_panic(C::NAME, &payload, panic.as_ref());
                    panic::resume_unwind(panic)
                }
            };

            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => {
                    if let PipelineError::Handler(inner) = &err {
                        if inner.is_unexpected() {
                            metrics::counter!("commands_failed_total", "command" => C::NAME)
                                .increment(1);
                            tracing::error!(
                                command = C::NAME,
                                %correlation_id,
                                payload = %payload,
                                error = %inner,
                                "command failed"
                            );
                        } else {
                            tracing::info!(
                                command = C::NAME,
                                %correlation_id,
                                error = %inner,
                                "command rejected"
                            );
                        }
                    }
                    Err(err)
                }
                Err(panic) => {
                    report_panic(C::NAME, &payload, panic.as_ref());
                    panic::resume_unwind(panic)
                }
            }
        })
    }
}
