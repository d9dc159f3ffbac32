//! Built pipelines and the onion execution engine.

use super::invoker::Argument;
use super::next::Next;
use super::parameter::{NotFound, ParameterKind, ParameterSpec, Source};
use super::stage::Stage;
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::core::TypeKey;
use crate::errors::{PipelineError, ResolutionError};
use crate::services::{ServiceProvider, ServiceResolver, ServiceScope};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::trace;

/// An immutable chain of stages for one event type.
///
/// Stage 0 is the terminal handler; the last stage is the outermost
/// middleware and runs first.
pub struct Pipeline {
    event: TypeKey,
    name: String,
    stages: Vec<Stage>,
    scope_per_stage: bool,
}

impl Pipeline {
    pub(crate) fn new(event: TypeKey, name: String, stages: Vec<Stage>, scope_per_stage: bool) -> Self {
        Self {
            event,
            name,
            stages,
            scope_per_stage,
        }
    }

    /// Returns the event type this pipeline handles.
    #[must_use]
    pub const fn event(&self) -> TypeKey {
        self.event
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages, terminal first.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the stage names in execution order, outermost first.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages.iter().rev().map(Stage::name).collect()
    }

    /// Returns true if every stage gets its own resolution scope.
    #[must_use]
    pub const fn scope_per_stage(&self) -> bool {
        self.scope_per_stage
    }

    /// Runs the chain against `context`, starting at the outermost stage.
    ///
    /// Returns the context after every stage that ran, or the single error
    /// that aborted the run.
    pub async fn execute(
        self: &Arc<Self>,
        context: RunContext,
        services: &ServiceProvider,
        cancellation: &CancellationToken,
    ) -> Result<RunContext, PipelineError> {
        if cancellation.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        context.set_cancellation(cancellation.clone());

        let Some(outermost) = self.stages.len().checked_sub(1) else {
            return Ok(context);
        };

        let run = Arc::new(PipelineRun {
            pipeline: Arc::clone(self),
            context,
            services: services.clone(),
            cancellation: cancellation.clone(),
            shared_scope: (!self.scope_per_stage).then(|| services.create_scope()),
        });

        let result = execute_stage(Arc::clone(&run), outermost).await;
        let context = run.context.clone();
        drop(run);
        result.map(|()| context)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("event", &self.event)
            .field("name", &self.name)
            .field("stages", &self.execution_order())
            .field("scope_per_stage", &self.scope_per_stage)
            .finish()
    }
}

/// Shared state of one pipeline execution.
pub(crate) struct PipelineRun {
    pipeline: Arc<Pipeline>,
    context: RunContext,
    services: ServiceProvider,
    cancellation: CancellationToken,
    shared_scope: Option<ServiceScope>,
}

impl PipelineRun {
    pub(crate) const fn context(&self) -> &RunContext {
        &self.context
    }
}

/// Resolves and runs the stage at `index`; inner stages run when it calls
/// its [`Next`].
pub(crate) fn execute_stage(
    run: Arc<PipelineRun>,
    index: usize,
) -> BoxFuture<'static, Result<(), PipelineError>> {
    async move {
        let Some(stage) = run.pipeline.stages.get(index) else {
            return Ok(());
        };

        // Dropped when this stage's turn ends, disposing its instances.
        let stage_scope = run
            .shared_scope
            .is_none()
            .then(|| run.services.create_scope());
        let resolver: &dyn ServiceResolver = match (&stage_scope, &run.shared_scope) {
            (Some(scope), _) | (None, Some(scope)) => scope,
            (None, None) => &run.services,
        };

        let next = Next::new(Arc::clone(&run), index.checked_sub(1));
        let arguments = resolve_arguments(stage, resolver, &run, &next)?;

        trace!(
            pipeline = %run.pipeline.name,
            stage = %stage.name(),
            "Entering stage"
        );
        let result = stage.invoke(arguments)?.await.map_err(PipelineError::from);
        drop(stage_scope);
        result
    }
    .boxed()
}

fn resolve_arguments(
    stage: &Stage,
    services: &dyn ServiceResolver,
    run: &PipelineRun,
    next: &Next,
) -> Result<Vec<Argument>, PipelineError> {
    stage
        .parameters()
        .iter()
        .enumerate()
        .map(|(position, spec)| match spec.kind {
            ParameterKind::Continuation => Ok(Argument::Next(next.clone())),
            ParameterKind::Cancellation => Ok(Argument::Cancellation(run.cancellation.clone())),
            ParameterKind::RunContext => Ok(Argument::Context(run.context.clone())),
            ParameterKind::Resolved => resolve_parameter(spec, services, &run.context).ok_or_else(|| {
                PipelineError::from(ResolutionError {
                    stage: stage.name().to_string(),
                    position,
                    type_name: spec.type_key.name(),
                    rule: spec.rule.clone(),
                })
            }),
        })
        .collect()
}

/// Applies a parameter's rule. Returns `None` when the rule says to throw.
pub(crate) fn resolve_parameter(
    spec: &ParameterSpec,
    services: &dyn ServiceResolver,
    context: &RunContext,
) -> Option<Argument> {
    let rule = &spec.rule;
    let lookup = |source: Source| match source {
        Source::Services => services.resolve(spec.type_key.id(), rule.key.as_deref()),
        Source::Context => context.get_value(spec.type_key.id()),
    };

    if let Some(value) = lookup(rule.primary) {
        return Some(Argument::Value(value));
    }

    let on_miss = if rule.fallback {
        if let Some(value) = lookup(rule.primary.other()) {
            return Some(Argument::Value(value));
        }
        rule.secondary_not_found
    } else {
        rule.primary_not_found
    };

    match on_miss {
        NotFound::Throw => None,
        NotFound::Default => Some(
            spec.default_value
                .clone()
                .map_or(Argument::Missing, Argument::Value),
        ),
    }
}
