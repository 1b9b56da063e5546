use std::sync::Arc;
use std::time::Duration;

use tower::{ServiceBuilder, ServiceExt};

use crate::handler::HandlerService;
use crate::logging::{Logging, LoggingLayer};
use crate::timing::{DEFAULT_SLOW_THRESHOLD, Timing, TimingLayer};
use crate::unhandled::{CaptureUnhandled, CaptureUnhandledLayer};
use crate::validation::{Validation, ValidationLayer};
use crate::{Command, CommandHandler, CommandRequest, PipelineError, RequestContext, RuleSet};

type Stack<C, H> = CaptureUnhandled<Logging<Timing<Validation<HandlerService<H, C>, C>>>>;

/// A handler wrapped in the fixed middleware chain.
pub struct Pipeline<C, H>
where
    C: Command,
    H: CommandHandler<C> + 'static,
{
    service: Stack<C, H>,
}

impl<C, H> Pipeline<C, H>
where
    C: Command,
    H: CommandHandler<C> + 'static,
{
    pub fn builder(handler: Arc<H>) -> PipelineBuilder<C, H> {
        PipelineBuilder {
            handler,
            rules: RuleSet::new(),
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    /// Runs one command through every stage.
    pub async fn send(
        &self,
        command: C,
        context: RequestContext,
    ) -> Result<C::Response, PipelineError<H::Error>> {
        self.service
            .clone()
            .oneshot(CommandRequest::new(command, context))
            .await
    }
}

pub struct PipelineBuilder<C, H> {
    handler: Arc<H>,
    rules: RuleSet<C>,
    slow_threshold: Duration,
}

impl<C, H> PipelineBuilder<C, H>
where
    C: Command,
    H: CommandHandler<C> + 'static,
{
    pub fn rules(mut self, rules: RuleSet<C>) -> Self {
        self.rules = rules;
        self
    }

    pub fn slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    pub fn build(self) -> Pipeline<C, H> {
        let service = ServiceBuilder::new()
            .layer(CaptureUnhandledLayer)
            .layer(LoggingLayer)
            .layer(TimingLayer::new(self.slow_threshold))
            .layer(ValidationLayer::new(self.rules))
            .service(HandlerService::new(self.handler));

        Pipeline { service }
    }
}
