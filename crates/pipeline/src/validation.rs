use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::{Command, CommandRequest, PipelineError, ValidationErrors};

type Predicate<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

struct Rule<C> {
    field: &'static str,
    message: String,
    predicate: Predicate<C>,
}

/// Declarative validation for one command type: each rule names a field, a
/// predicate that must hold, and the message reported when it does not.
///
/// ```
/// # use pipeline::RuleSet;
/// struct Rename { name: String }
///
/// let rules = RuleSet::<Rename>::new()
///     .rule("name", "must not be empty", |c| !c.name.trim().is_empty());
///
/// assert!(rules.validate(&Rename { name: String::new() }).is_err());
/// ```
pub struct RuleSet<C> {
    rules: Vec<Rule<C>>,
}

impl<C> RuleSet<C> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule<F>(mut self, field: &'static str, message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            field,
            message: message.into(),
            predicate: Box::new(predicate),
        });
        self
    }

    /// Runs every rule and reports all failures together.
    pub fn validate(&self, command: &C) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for rule in &self.rules {
            if !(rule.predicate)(command) {
                errors.push(rule.field, rule.message.clone());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<C> Default for RuleSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for RuleSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| (rule.field, &rule.message)))
            .finish()
    }
}

/// Short-circuits commands that fail their rule set.
pub struct ValidationLayer<C> {
    rules: Arc<RuleSet<C>>,
}

impl<C> ValidationLayer<C> {
    pub fn new(rules: RuleSet<C>) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }
}

impl<C> Clone for ValidationLayer<C> {
    fn clone(&self) -> Self {
        Self {
            rules: Arc::clone(&self.rules),
        }
    }
}

impl<S, C> Layer<S> for ValidationLayer<C> {
    type Service = Validation<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        Validation {
            inner,
            rules: Arc::clone(&self.rules),
        }
    }
}

pub struct Validation<S, C> {
    inner: S,
    rules: Arc<RuleSet<C>>,
}

impl<S: Clone, C> Clone for Validation<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            rules: Arc::clone(&self.rules),
        }
    }
}

impl<S, C, E> Service<CommandRequest<C>> for Validation<S, C>
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
        if let Err(errors) = self.rules.validate(&request.command) {
            tracing::info!(command = C::NAME, errors = %errors, "command failed validation");
            metrics::counter!("commands_rejected_total", "command" => C::NAME).increment(1);
            return Box::pin(async move { Err(PipelineError::Validation(errors)) });
        }

        if request.context.is_cancelled() {
            tracing::info!(command = C::NAME, "command cancelled before handling");
            return Box::pin(async { Err(PipelineError::Cancelled) });
        }

        Box::pin(self.inner.call(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddLine {
        sku: String,
        quantity: i64,
    }

    fn rules() -> RuleSet<AddLine> {
        RuleSet::new()
            .rule("sku", "must not be empty", |c: &AddLine| !c.sku.is_empty())
            .rule("quantity", "must be greater than zero", |c: &AddLine| {
                c.quantity > 0
            })
    }

    #[test]
    fn passing_command_has_no_errors() {
        let command = AddLine {
            sku: "P1".into(),
            quantity: 2,
        };
        assert!(rules().validate(&command).is_ok());
    }

    #[test]
    fn every_failing_rule_is_reported() {
        let command = AddLine {
            sku: String::new(),
            quantity: 0,
        };

        let errors = rules().validate(&command).unwrap_err();

        let fields: Vec<_> = errors.fields().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["sku", "quantity"]);
    }

    #[test]
    fn empty_rule_set_accepts_everything() {
        let command = AddLine {
            sku: String::new(),
            quantity: -1,
        };
        assert!(RuleSet::new().validate(&command).is_ok());
    }
}
