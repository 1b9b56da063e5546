use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower::Service;

use crate::{Command, CommandHandler, CommandRequest, PipelineError};

/// Adapts a [`CommandHandler`] into the innermost tower service.
pub struct HandlerService<H, C> {
    handler: Arc<H>,
    _command: PhantomData<fn(C)>,
}

impl<H, C> HandlerService<H, C> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            _command: PhantomData,
        }
    }
}

impl<H, C> Clone for HandlerService<H, C> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.handler))
    }
}

impl<H, C> Service<CommandRequest<C>> for HandlerService<H, C>
where
    C: Command,
    H: CommandHandler<C> + 'static,
{
    type Response = C::Response;
    type Error = PipelineError<H::Error>;
    type Future = BoxFuture<'static, Result<C::Response, PipelineError<H::Error>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: CommandRequest<C>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let CommandRequest { command, context } = request;
            handler
                .handle(command, &context)
                .await
                .map_err(PipelineError::Handler)
        })
    }
}
