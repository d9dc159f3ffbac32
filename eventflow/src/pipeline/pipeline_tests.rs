//! Tests for pipeline building and onion execution.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::context::RunContext;
    use crate::errors::PipelineError;
    use crate::events::{CollectingEventSink, ERROR_CALLBACK_FAILED};
    use crate::handlers::EventHandler;
    use crate::pipeline::{
        Next, NotFound, Pipeline, PipelineBuilder, ResolutionRule, Source, ERROR_BOUNDARY_STAGE,
        TERMINAL_STAGE,
    };
    use crate::services::{ServiceCollection, ServiceProvider};
    use crate::testing::Recorder;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug)]
    struct Order(u32);

    #[derive(Debug)]
    struct Database(&'static str);

    fn fail(message: &'static str) -> anyhow::Result<()> {
        Err(anyhow::anyhow!(message))
    }

    async fn run(pipeline: Pipeline, event: Order, services: &ServiceProvider) -> Result<RunContext, PipelineError> {
        let context = RunContext::new();
        context.insert(Arc::new(event));
        Arc::new(pipeline)
            .execute(context, services, &CancellationToken::new())
            .await
    }

    fn tracing_middleware(recorder: &Recorder, name: &'static str) -> impl Fn(Next) -> futures::future::BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
        let recorder = recorder.clone();
        move |next: Next| {
            let recorder = recorder.clone();
            Box::pin(async move {
                recorder.record(format!("{name}:before"));
                next.run().await?;
                recorder.record(format!("{name}:after"));
                anyhow::Ok(())
            })
        }
    }

    fn recording_handler(recorder: &Recorder) -> impl Fn(Arc<Order>) -> futures::future::BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
        let recorder = recorder.clone();
        move |order: Arc<Order>| {
            let recorder = recorder.clone();
            Box::pin(async move {
                recorder.record(format!("handler:{}", order.0));
                anyhow::Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_last_attached_middleware_runs_first() {
        let recorder = Recorder::new();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .wrap_named("inner", tracing_middleware(&recorder, "inner"))
            .handler(recording_handler(&recorder))
            .wrap_named("outer", tracing_middleware(&recorder, "outer"))
            .build()
            .unwrap();

        assert_eq!(pipeline.execution_order(), vec!["outer", "inner", TERMINAL_STAGE]);
        run(pipeline, Order(1), &ServiceProvider::default()).await.unwrap();

        assert_eq!(
            recorder.labels(),
            vec!["outer:before", "inner:before", "handler:1", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn test_middleware_short_circuits_by_not_calling_next() {
        let recorder = Recorder::new();
        let gate = recorder.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(recording_handler(&recorder))
            .wrap(move |order: Arc<Order>| {
                let gate = gate.clone();
                async move {
                    gate.record(format!("gate:{}", order.0));
                    anyhow::Ok(())
                }
            })
            .build()
            .unwrap();

        let result = run(pipeline, Order(9), &ServiceProvider::default()).await;

        assert!(result.is_ok());
        assert_eq!(recorder.labels(), vec!["gate:9"]);
    }

    #[tokio::test]
    async fn test_next_twice_runs_inner_chain_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
            .wrap(|next: Next| async move {
                next.run().await?;
                let again = next.clone();
                again.run().await?;
                anyhow::ensure!(next.has_run());
                anyhow::Ok(())
            })
            .build()
            .unwrap();

        run(pipeline, Order(1), &ServiceProvider::default()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_resumes_after_abandoned_wait() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    anyhow::Ok(())
                }
            })
            .wrap(|next: Next| async move {
                let first = tokio::time::timeout(Duration::from_millis(5), next.run()).await;
                anyhow::ensure!(first.is_err(), "inner chain finished before the timeout");
                anyhow::ensure!(next.is_started() && !next.has_run());
                next.run().await?;
                anyhow::ensure!(next.has_run());
                anyhow::Ok(())
            })
            .build()
            .unwrap();

        run(pipeline, Order(1), &ServiceProvider::default()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_aborts_remaining_stages() {
        let recorder = Recorder::new();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Order>| async { fail("payment declined") })
            .wrap_named("inner", tracing_middleware(&recorder, "inner"))
            .wrap_named("outer", tracing_middleware(&recorder, "outer"))
            .build()
            .unwrap();

        let error = run(pipeline, Order(1), &ServiceProvider::default())
            .await
            .unwrap_err();

        assert!(error.is_handler());
        assert!(error.to_string().contains("payment declined"));
        assert_eq!(recorder.labels(), vec!["outer:before", "inner:before"]);
    }

    #[tokio::test]
    async fn test_middleware_recovers_from_inner_failure() {
        let recorder = Recorder::new();
        let observed = recorder.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Order>| async { fail("flaky") })
            .wrap(move |next: Next| {
                let observed = observed.clone();
                async move {
                    if let Err(error) = next.run().await {
                        observed.record(format!("recovered:{}", error.kind()));
                    }
                    anyhow::Ok(())
                }
            })
            .build()
            .unwrap();

        let result = run(pipeline, Order(1), &ServiceProvider::default()).await;

        assert!(result.is_ok());
        assert_eq!(recorder.labels(), vec!["recovered:handler"]);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_resolution_error() {
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Order>, _: Arc<Database>| async { anyhow::Ok(()) })
            .build()
            .unwrap();

        let error = run(pipeline, Order(1), &ServiceProvider::default())
            .await
            .unwrap_err();

        match error {
            PipelineError::Resolution(resolution) => {
                assert_eq!(resolution.position, 1);
                assert_eq!(resolution.stage, TERMINAL_STAGE);
                assert_eq!(resolution.rule, ResolutionRule::default());
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolution_error_propagates_through_middleware_question_mark() {
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Database>| async { anyhow::Ok(()) })
            .wrap(|next: Next| async move {
                next.run().await?;
                anyhow::Ok(())
            })
            .build()
            .unwrap();

        let error = run(pipeline, Order(1), &ServiceProvider::default())
            .await
            .unwrap_err();

        assert!(error.is_resolution());
    }

    #[tokio::test]
    async fn test_optional_and_defaulted_parameters() {
        let recorder = Recorder::new();
        let seen = recorder.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(move |db: Arc<Database>, missing: Option<Arc<u64>>| {
                let seen = seen.clone();
                async move {
                    seen.record(format!("{}:{}", db.0, missing.is_none()));
                    anyhow::Ok(())
                }
            })
            .with_rule(0, ResolutionRule::only(Source::Services).on_primary_not_found(NotFound::Default))
            .with_default(0, Database("fallback"))
            .build()
            .unwrap();

        run(pipeline, Order(1), &ServiceProvider::default()).await.unwrap();

        assert_eq!(recorder.labels(), vec!["fallback:true"]);
    }

    #[tokio::test]
    async fn test_keyed_and_context_first_rules() {
        let mut services = ServiceCollection::new();
        services.add_instance(Database("default"));
        services.add_shared(Some("replica"), Arc::new(Database("replica")));
        let services = services.build();

        let recorder = Recorder::new();
        let seen = recorder.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(move |keyed: Arc<Database>, ctx_first: Arc<Database>| {
                let seen = seen.clone();
                async move {
                    seen.record(format!("{}|{}", keyed.0, ctx_first.0));
                    anyhow::Ok(())
                }
            })
            .with_rule(0, ResolutionRule::default().with_key("replica"))
            .with_rule(1, ResolutionRule::context_first())
            .wrap(|context: RunContext, next: Next| async move {
                context.insert(Arc::new(Database("from-context")));
                next.run().await?;
                anyhow::Ok(())
            })
            .build()
            .unwrap();

        run(pipeline, Order(1), &services).await.unwrap();

        assert_eq!(recorder.labels(), vec!["replica|from-context"]);
    }

    #[derive(Debug)]
    struct UnitOfWork;

    fn unit_of_work_services() -> (ServiceProvider, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let mut services = ServiceCollection::new();
        services.add_scoped(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            UnitOfWork
        });
        (services.build(), created)
    }

    fn unit_of_work_pipeline(scope_per_stage: bool) -> Pipeline {
        PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<UnitOfWork>| async { anyhow::Ok(()) })
            .wrap(|_: Arc<UnitOfWork>, next: Next| async move {
                next.run().await?;
                anyhow::Ok(())
            })
            .scope_per_stage(scope_per_stage)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_shared_scope_resolves_one_scoped_instance() {
        let (services, created) = unit_of_work_services();

        run(unit_of_work_pipeline(false), Order(1), &services).await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scope_per_stage_resolves_fresh_instances() {
        let (services, created) = unit_of_work_services();

        run(unit_of_work_pipeline(true), Order(1), &services).await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let recorder = Recorder::new();
        let pipeline = Arc::new(
            PipelineBuilder::for_event::<Order>()
                .handler(recording_handler(&recorder))
                .build()
                .unwrap(),
        );
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let result = pipeline
            .execute(RunContext::new(), &ServiceProvider::default(), &token)
            .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(recorder.is_empty());
    }

    #[tokio::test]
    async fn test_ambient_parameters_are_supplied() {
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|token: CancellationToken, context: RunContext| async move {
                anyhow::ensure!(!token.is_cancelled());
                anyhow::ensure!(context.cancellation().is_some_and(|t| t.same_token(&token)));
                context.insert(Arc::new(Database("written")));
                anyhow::Ok(())
            })
            .build()
            .unwrap();

        let context = run(pipeline, Order(1), &ServiceProvider::default()).await.unwrap();

        assert_eq!(context.get::<Database>().map(|d| d.0), Some("written"));
    }

    #[tokio::test]
    async fn test_error_boundary_forwards_handler_failure() {
        let recorder = Recorder::new();
        let seen = recorder.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Order>| async { fail("boom") })
            .on_error(move |error, _context| {
                let seen = seen.clone();
                async move {
                    seen.record(format!("callback:{error}"));
                    anyhow::Ok(())
                }
            })
            .build()
            .unwrap();

        assert_eq!(pipeline.execution_order(), vec![ERROR_BOUNDARY_STAGE, TERMINAL_STAGE]);
        let result = run(pipeline, Order(1), &ServiceProvider::default()).await;

        assert!(result.is_ok());
        assert_eq!(recorder.labels(), vec!["callback:boom"]);
    }

    #[tokio::test]
    async fn test_failing_error_callback_is_suppressed_and_reported() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline = Arc::new(
            PipelineBuilder::for_event::<Order>()
                .handler(|_: Arc<Order>| async { fail("boom") })
                .on_error(|_, _| async { fail("callback broke") })
                .build()
                .unwrap(),
        );
        let context = RunContext::new();
        context.insert(Arc::new(Order(1)));
        context.set_sink(sink.clone());

        let result = pipeline
            .execute(context, &ServiceProvider::default(), &CancellationToken::new())
            .await;

        assert!(result.is_ok());
        assert_eq!(sink.count_of_type(ERROR_CALLBACK_FAILED), 1);
    }

    #[tokio::test]
    async fn test_error_boundary_ignores_resolution_errors() {
        let callbacks = Arc::new(AtomicUsize::new(0));
        let counter = callbacks.clone();
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Database>| async { anyhow::Ok(()) })
            .on_error(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { anyhow::Ok(()) }
            })
            .build()
            .unwrap();

        let error = run(pipeline, Order(1), &ServiceProvider::default())
            .await
            .unwrap_err();

        assert!(error.is_resolution());
        assert_eq!(callbacks.load(Ordering::SeqCst), 0);
    }

    #[derive(Default)]
    struct OrderHandler {
        recorder: Recorder,
    }

    #[async_trait]
    impl EventHandler<Order> for OrderHandler {
        async fn handle(&self, event: Arc<Order>, _context: RunContext) -> anyhow::Result<()> {
            self.recorder.record(format!("handle:{}", event.0));
            anyhow::ensure!(event.0 > 0, "order is empty");
            Ok(())
        }

        async fn on_error(&self, error: Arc<anyhow::Error>, _context: RunContext) -> anyhow::Result<()> {
            self.recorder.record(format!("on_error:{error}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_service_handler_forwards_to_on_error() {
        let recorder = Recorder::new();
        let shared = recorder.clone();
        let mut services = ServiceCollection::new();
        services.add_transient(move |_| OrderHandler {
            recorder: shared.clone(),
        });
        let services = services.build();

        let ok = run(PipelineBuilder::for_service::<Order, OrderHandler>(None).build().unwrap(), Order(3), &services).await;
        let failed = run(PipelineBuilder::for_service::<Order, OrderHandler>(None).build().unwrap(), Order(0), &services).await;

        assert!(ok.is_ok());
        assert!(failed.is_ok());
        assert_eq!(
            recorder.labels(),
            vec!["handle:3", "handle:0", "on_error:order is empty"]
        );
    }

    #[tokio::test]
    async fn test_keyed_service_handler_requires_key() {
        let mut services = ServiceCollection::new();
        services.add(crate::services::ServiceLifetime::Singleton, Some("eu"), |_| OrderHandler::default());
        let services = services.build();

        let keyed = run(PipelineBuilder::for_service::<Order, OrderHandler>(Some("eu")).build().unwrap(), Order(1), &services).await;
        let unkeyed = run(PipelineBuilder::for_service::<Order, OrderHandler>(None).build().unwrap(), Order(1), &services).await;

        assert!(keyed.is_ok());
        assert!(unkeyed.is_err_and(|e| e.is_resolution()));
    }

    #[test]
    fn test_build_rejects_missing_and_duplicate_handlers() {
        let missing = PipelineBuilder::for_event::<Order>()
            .wrap(|next: Next| async move {
                next.run().await?;
                anyhow::Ok(())
            })
            .build();
        let duplicate = PipelineBuilder::for_event::<Order>()
            .handler(|| async { anyhow::Ok(()) })
            .handler(|| async { anyhow::Ok(()) })
            .build();

        assert!(missing.unwrap_err().to_string().contains("missing terminal handler"));
        assert!(duplicate.unwrap_err().to_string().contains("duplicate terminal handler"));
    }

    #[test]
    fn test_build_rejects_invalid_rules() {
        let ambient = PipelineBuilder::for_event::<Order>()
            .handler(|_: Next| async { anyhow::Ok(()) })
            .with_rule(0, ResolutionRule::context_first())
            .build();
        let out_of_range = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Order>| async { anyhow::Ok(()) })
            .with_rule(3, ResolutionRule::context_first())
            .build();
        let wrong_default = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Database>| async { anyhow::Ok(()) })
            .with_default(0, 5_u32)
            .build();
        let default_without_value = PipelineBuilder::for_event::<Order>()
            .handler(|_: Arc<Database>| async { anyhow::Ok(()) })
            .with_rule(0, ResolutionRule::default().on_not_found(NotFound::Default))
            .build();

        assert!(ambient.unwrap_err().to_string().contains("supplied by the pipeline"));
        assert!(out_of_range.unwrap_err().to_string().contains("does not exist"));
        assert!(wrong_default.unwrap_err().to_string().contains("expected"));
        assert!(default_without_value.unwrap_err().to_string().contains("declares none"));
    }

    #[test]
    fn test_default_pipeline_name() {
        let pipeline = PipelineBuilder::for_event::<Order>()
            .handler(|| async { anyhow::Ok(()) })
            .build()
            .unwrap();

        assert_eq!(pipeline.name(), "Order-pipeline");
        assert!(!pipeline.scope_per_stage());
    }
}
