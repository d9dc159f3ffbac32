//! The dispatch loop and its execution workers.

use super::item::{DispatchItem, PublishedEvent};
use crate::cancellation::CancellationToken;
use crate::context::{ExecutionContext, RunContext};
use crate::core::TypeKey;
use crate::errors::PipelineError;
use crate::events::{EventSink, PIPELINE_FAILED, RESOLUTION_FAILED, RETRY_SCHEDULED, UNHANDLED_EVENT};
use crate::handlers::DynamicHandlerRegistry;
use crate::pipeline::{Pipeline, PipelineRegistry};
use crate::pool::{BrokerPools, Pooled};
use crate::retry::RetryQueue;
use crate::services::ServiceProvider;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Semaphore;
use tracing::{debug, error, trace, warn};

/// Drains the dispatch queue, routes events to pipelines and runs each
/// (event, pipeline) pair behind the concurrency gate.
pub struct Dispatcher {
    pub(crate) registry: Arc<PipelineRegistry>,
    pub(crate) dynamic: Arc<DynamicHandlerRegistry>,
    pub(crate) gate: Arc<Semaphore>,
    pub(crate) pools: BrokerPools,
    pub(crate) retry_queue: Arc<RetryQueue>,
    pub(crate) services: ServiceProvider,
    pub(crate) cancellation: CancellationToken,
    pub(crate) log_missing_handlers: bool,
    pub(crate) sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    /// Runs the loop until the broker is cancelled or every sender is gone.
    pub async fn run(self: Arc<Self>, mut receiver: UnboundedReceiver<DispatchItem>) {
        debug!(
            max_concurrent_handlers = self.gate.available_permits(),
            "Dispatch loop started"
        );

        loop {
            let item = tokio::select! {
                biased;
                () = self.cancellation.cancelled() => break,
                item = receiver.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let running = match item {
                DispatchItem::Event(event) => self.route(event).await,
                DispatchItem::Retry(descriptor) => {
                    let mut execution = self.pools.executions.rent();
                    execution.prepare_retry(descriptor, self.cancellation.clone());
                    self.launch(execution).await
                }
            };
            if !running {
                break;
            }
        }

        debug!("Dispatch loop stopped");
    }

    /// Launches one execution per static and dynamic pipeline for the
    /// event's exact type. Returns false once the broker is cancelled.
    async fn route(self: &Arc<Self>, event: PublishedEvent) -> bool {
        let key = event.key();
        let statics = self.registry.pipelines_for(key.id());
        let dynamic = self.dynamic.snapshot(key.id());
        let dynamic = dynamic.as_deref().map_or(&[][..], Vec::as_slice);

        if statics.is_empty() && dynamic.is_empty() {
            self.report_unhandled(key);
            return true;
        }

        let pipelines = statics.iter().chain(dynamic.iter().map(|entry| &entry.pipeline));
        for pipeline in pipelines {
            let mut execution = self.pools.executions.rent();
            execution.prepare(
                event.clone(),
                Arc::clone(pipeline),
                self.pools.policies.rent(),
                self.cancellation.clone(),
            );
            if !self.launch(execution).await {
                return false;
            }
        }
        true
    }

    /// Waits for a concurrency permit, then runs the execution on its own
    /// task. Returns false if the broker was cancelled while waiting.
    async fn launch(self: &Arc<Self>, execution: Pooled<ExecutionContext>) -> bool {
        let permit = tokio::select! {
            biased;
            () = self.cancellation.cancelled() => return false,
            permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let event_type = execution.event().map(PublishedEvent::key);
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(panic) = AssertUnwindSafe(dispatcher.execute(execution)).catch_unwind().await {
                error!(
                    event_type = ?event_type,
                    panic = %panic_message(panic.as_ref()),
                    "Pipeline execution panicked"
                );
            }
        });
        true
    }

    async fn execute(&self, mut execution: Pooled<ExecutionContext>) {
        let cancellation = execution
            .cancellation()
            .cloned()
            .unwrap_or_else(|| self.cancellation.clone());
        if cancellation.is_cancelled() {
            trace!("Broker cancelled, abandoning execution");
            return;
        }

        let (Some(event), Some(pipeline), Some(policy)) = (
            execution.event().cloned(),
            execution.pipeline().cloned(),
            execution.policy().cloned(),
        ) else {
            return;
        };

        let context = self.pools.contexts.rent();
        context.insert_value(event.key(), event.value().clone());
        context.insert(Arc::clone(&policy));
        context.set_sink(Arc::clone(&self.sink));

        trace!(
            event_type = %event.key(),
            pipeline = %pipeline.name(),
            attempt = policy.attempt(),
            "Executing pipeline"
        );
        let outcome = pipeline
            .execute(RunContext::clone(&context), &self.services, &cancellation)
            .await
            .map(drop);
        drop(context);

        if let Err(error) = &outcome {
            self.report_failure(&pipeline, event.key(), error);
        }

        let resolution_failed = outcome.as_ref().is_err_and(PipelineError::is_resolution);
        let retry_delay = if cancellation.is_cancelled() || resolution_failed {
            None
        } else {
            policy.begin_next_attempt()
        };
        drop(policy);

        let Some(delay) = retry_delay else {
            return;
        };
        let Some(descriptor) = execution.take_descriptor() else {
            return;
        };

        let attempt = descriptor.attempt();
        debug!(
            event_type = %event.key(),
            pipeline = %pipeline.name(),
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling retry"
        );
        self.sink.try_emit(
            RETRY_SCHEDULED,
            Some(serde_json::json!({
                "event_type": event.key().name(),
                "pipeline": pipeline.name(),
                "attempt": attempt,
                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            })),
        );
        self.retry_queue.schedule(descriptor, delay);
    }

    fn report_unhandled(&self, key: TypeKey) {
        if !self.log_missing_handlers {
            return;
        }
        warn!(event_type = %key, "No handler registered for event {}", key.short_name());
        self.sink.try_emit(
            UNHANDLED_EVENT,
            Some(serde_json::json!({
                "event_type": key.name(),
                "event": key.short_name(),
            })),
        );
    }

    fn report_failure(&self, pipeline: &Pipeline, key: TypeKey, failure: &PipelineError) {
        match failure {
            PipelineError::Cancelled => {
                debug!(event_type = %key, pipeline = %pipeline.name(), "Pipeline cancelled before start");
            }
            PipelineError::Resolution(resolution) => {
                error!(
                    event_type = %key,
                    pipeline = %pipeline.name(),
                    error = %resolution,
                    "Parameter resolution failed"
                );
                self.sink.try_emit(
                    RESOLUTION_FAILED,
                    Some(serde_json::json!({
                        "event_type": key.name(),
                        "pipeline": pipeline.name(),
                        "stage": resolution.stage,
                        "position": resolution.position,
                        "parameter_type": resolution.type_name,
                        "rule": resolution.rule.to_string(),
                    })),
                );
            }
            other => {
                error!(
                    event_type = %key,
                    pipeline = %pipeline.name(),
                    error = %other,
                    kind = other.kind(),
                    "Pipeline failed"
                );
                self.sink.try_emit(
                    PIPELINE_FAILED,
                    Some(serde_json::json!({
                        "event_type": key.name(),
                        "pipeline": pipeline.name(),
                        "kind": other.kind(),
                        "error": other.to_string(),
                    })),
                );
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("static_pipelines", &self.registry.len())
            .field("dynamic_pipelines", &self.dynamic.len())
            .field("available_permits", &self.gate.available_permits())
            .field("retry_queue", &self.retry_queue)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
