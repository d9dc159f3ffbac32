//! Pipeline builder with validation.

use super::boundary::{error_boundary, report_callback_failure, ErrorCallback};
use super::definition::Pipeline;
use super::invoker::HandlerFn;
use super::parameter::{NotFound, ParameterKind, ResolutionRule, Source};
use super::stage::Stage;
use crate::context::RunContext;
use crate::core::{Event, TypeKey};
use crate::errors::ConfigError;
use crate::handlers::EventHandler;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// Stage name used for the terminal handler.
pub const TERMINAL_STAGE: &str = "handler";

#[derive(Debug, Clone, Copy)]
enum Attached {
    Terminal,
    Middleware(usize),
}

/// Builder for an event pipeline.
///
/// Middleware attached later wraps everything attached before it; the
/// terminal handler is always innermost. Rule and default overrides apply to
/// the most recently attached stage. Misuse is collected and reported by
/// [`build`](Self::build).
pub struct PipelineBuilder {
    event: TypeKey,
    name: Option<String>,
    terminal: Option<Stage>,
    middleware: Vec<Stage>,
    last: Option<Attached>,
    scope_per_stage: bool,
    error_callback: Option<ErrorCallback>,
    errors: Vec<String>,
}

impl PipelineBuilder {
    /// Starts a pipeline for events of type `E`.
    #[must_use]
    pub fn for_event<E: Event>() -> Self {
        Self {
            event: TypeKey::of::<E>(),
            name: None,
            terminal: None,
            middleware: Vec::new(),
            last: None,
            scope_per_stage: false,
            error_callback: None,
            errors: Vec::new(),
        }
    }

    /// Starts a pipeline whose terminal handler is an [`EventHandler`]
    /// resolved from the service registry, optionally by key.
    ///
    /// Failures of `handle` are forwarded to the handler's `on_error`.
    #[must_use]
    pub fn for_service<E: Event, H: EventHandler<E>>(key: Option<&str>) -> Self {
        let name = TypeKey::of::<H>().short_name().to_string();
        let handler_rule = match key {
            Some(key) => ResolutionRule::only(Source::Services).with_key(key),
            None => ResolutionRule::only(Source::Services),
        };

        let pipeline = name.clone();
        Self::for_event::<E>()
            .named(name)
            .handler(move |event: Arc<E>, handler: Arc<H>, context: RunContext| {
                let pipeline = pipeline.clone();
                async move {
                    if let Err(error) = handler.handle(event, context.clone()).await {
                        if let Err(failure) = handler.on_error(Arc::new(error), context.clone()).await {
                            report_callback_failure(&context, &pipeline, &failure);
                        }
                    }
                    anyhow::Ok(())
                }
            })
            .with_rule(0, ResolutionRule::context_first())
            .with_rule(1, handler_rule)
    }

    /// Sets the pipeline name used in logs.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the terminal handler.
    #[must_use]
    pub fn handler<H, Args>(mut self, handler: H) -> Self
    where
        H: HandlerFn<Args>,
        Args: 'static,
    {
        if self.terminal.is_some() {
            self.errors.push("duplicate terminal handler".to_string());
            return self;
        }
        self.terminal = Some(Stage::new(TERMINAL_STAGE, handler));
        self.last = Some(Attached::Terminal);
        self
    }

    /// Wraps the chain built so far in a middleware.
    #[must_use]
    pub fn wrap<H, Args>(self, middleware: H) -> Self
    where
        H: HandlerFn<Args>,
        Args: 'static,
    {
        let name = format!("middleware-{}", self.middleware.len() + 1);
        self.wrap_named(name, middleware)
    }

    /// Wraps the chain built so far in a named middleware.
    #[must_use]
    pub fn wrap_named<H, Args>(mut self, name: impl Into<String>, middleware: H) -> Self
    where
        H: HandlerFn<Args>,
        Args: 'static,
    {
        self.middleware.push(Stage::new(name, middleware));
        self.last = Some(Attached::Middleware(self.middleware.len() - 1));
        self
    }

    /// Overrides the resolution rule of a parameter of the last attached
    /// stage.
    #[must_use]
    pub fn with_rule(mut self, position: usize, rule: ResolutionRule) -> Self {
        if let Some(spec) = self.resolved_parameter(position, "rule") {
            spec.rule = rule;
        }
        self
    }

    /// Declares the default value of a parameter of the last attached stage.
    #[must_use]
    pub fn with_default<T: Send + Sync + 'static>(mut self, position: usize, value: T) -> Self {
        let Some(spec) = self.resolved_parameter(position, "default value") else {
            return self;
        };
        if spec.type_key != TypeKey::of::<T>() {
            let reason = format!(
                "default for parameter #{position} has type '{}', expected '{}'",
                std::any::type_name::<T>(),
                spec.type_key
            );
            self.errors.push(reason);
            return self;
        }
        spec.default_value = Some(Arc::new(value) as Arc<dyn Any + Send + Sync>);
        self
    }

    /// Gives every stage its own resolution scope instead of one per run.
    #[must_use]
    pub fn scope_per_stage(mut self, enabled: bool) -> Self {
        self.scope_per_stage = enabled;
        self
    }

    /// Forwards terminal handler failures to `callback`.
    ///
    /// A failing callback is logged and suppressed.
    #[must_use]
    pub fn on_error<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Arc<anyhow::Error>, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.error_callback = Some(Arc::new(move |error, context| callback(error, context).boxed()));
        self
    }

    /// Validates the registration and freezes the pipeline.
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        let event = self.event.name();
        if let Some(reason) = self.errors.into_iter().next() {
            return Err(ConfigError::registration(event, reason));
        }
        let Some(terminal) = self.terminal else {
            return Err(ConfigError::registration(event, "missing terminal handler"));
        };

        let name = self
            .name
            .unwrap_or_else(|| format!("{}-pipeline", self.event.short_name()));

        let mut stages = Vec::with_capacity(self.middleware.len() + 2);
        stages.push(terminal);
        if let Some(callback) = self.error_callback {
            stages.push(error_boundary(callback, name.clone()));
        }
        stages.extend(self.middleware);

        for stage in &stages {
            validate_defaults(stage).map_err(|reason| ConfigError::registration(event, reason))?;
        }

        Ok(Pipeline::new(self.event, name, stages, self.scope_per_stage))
    }

    fn resolved_parameter(
        &mut self,
        position: usize,
        what: &str,
    ) -> Option<&mut super::parameter::ParameterSpec> {
        let stage = match self.last {
            Some(Attached::Terminal) => self.terminal.as_mut(),
            Some(Attached::Middleware(index)) => self.middleware.get_mut(index),
            None => None,
        };
        let Some(stage) = stage else {
            self.errors.push(format!("{what} set before any stage was attached"));
            return None;
        };

        let stage_name = stage.name().to_string();
        match stage.parameters_mut().get_mut(position) {
            None => {
                self.errors.push(format!(
                    "{what} targets parameter #{position} of stage '{stage_name}', which does not exist"
                ));
                None
            }
            Some(spec) if spec.kind != ParameterKind::Resolved => {
                self.errors.push(format!(
                    "{what} targets parameter #{position} of stage '{stage_name}', which is supplied by the pipeline"
                ));
                None
            }
            Some(spec) => Some(spec),
        }
    }
}

/// A non-optional parameter whose rule can substitute a default must
/// declare one.
fn validate_defaults(stage: &Stage) -> Result<(), String> {
    for (position, spec) in stage.parameters().iter().enumerate() {
        if spec.kind != ParameterKind::Resolved || spec.optional || spec.default_value.is_some() {
            continue;
        }
        let on_miss = if spec.rule.fallback {
            spec.rule.secondary_not_found
        } else {
            spec.rule.primary_not_found
        };
        if on_miss == NotFound::Default {
            return Err(format!(
                "parameter #{position} of stage '{}' substitutes a default but declares none",
                stage.name()
            ));
        }
    }
    Ok(())
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("event", &self.event)
            .field("name", &self.name)
            .field("has_terminal", &self.terminal.is_some())
            .field("middleware", &self.middleware.len())
            .field("scope_per_stage", &self.scope_per_stage)
            .finish_non_exhaustive()
    }
}
