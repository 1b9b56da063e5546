use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::{Command, CommandRequest, PipelineError};

/// Commands slower than this are reported.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(500);

/// Measures wall-clock duration and warns once per slow command. Never
/// changes the result.
#[derive(Debug, Clone, Copy)]
pub struct TimingLayer {
    threshold: Duration,
}

impl TimingLayer {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Default for TimingLayer {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD)
    }
}

impl<S> Layer<S> for TimingLayer {
    type Service = Timing<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Timing {
            inner,
            threshold: self.threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timing<S> {
    inner: S,
    threshold: Duration,
}

impl<S, C, E> Service<CommandRequest<C>> for Timing<S>
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
        let payload = request.payload();
        let threshold = self.threshold;
        let started = Instant::now();
        let future = self.inner.call(request);

        Box::pin(async move {
            let result = future.await;
            let elapsed = started.elapsed();

            metrics::histogram!("command_duration_seconds", "command" => C::NAME)
                .record(elapsed.as_secs_f64());

            if elapsed > threshold {
                metrics::counter!("commands_slow_total", "command" => C::NAME).increment(1);
                tracing::warn!(
                    command = C::NAME,
                    elapsed_ms = elapsed.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    payload = %payload,
                    "slow command"
                );
            }

            result
        })
    }
}
