//! Broker builder.

use super::facade::{Broker, BrokerInner};
use crate::cancellation::CancellationToken;
use crate::config::BrokerConfig;
use crate::core::Event;
use crate::dispatch::Dispatcher;
use crate::errors::{BrokerError, ConfigError};
use crate::events::{EventSink, NoOpEventSink};
use crate::handlers::{DynamicHandlerRegistry, EventHandler};
use crate::pipeline::{Pipeline, PipelineBuilder, PipelineRegistry};
use crate::pool::BrokerPools;
use crate::retry::RetryQueue;
use crate::services::{ServiceCollection, ServiceLifetime, ServiceResolver};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::info;

/// Collects configuration, services and pipelines, then starts the engine.
pub struct BrokerBuilder {
    config: BrokerConfig,
    services: ServiceCollection,
    registry: PipelineRegistry,
    sink: Arc<dyn EventSink>,
    errors: Vec<ConfigError>,
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::default(),
            services: ServiceCollection::new(),
            registry: PipelineRegistry::new(),
            sink: Arc::new(NoOpEventSink),
            errors: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the concurrency budget. Must be positive.
    #[must_use]
    pub fn max_concurrent_handlers(mut self, max: usize) -> Self {
        self.config.max_concurrent_handlers = max;
        self
    }

    /// Enables or disables the missing-handler warning.
    #[must_use]
    pub fn log_missing_handlers(mut self, enabled: bool) -> Self {
        self.config.log_missing_handlers = enabled;
        self
    }

    /// Sets the sink receiving observability events.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Registers a service factory with a lifetime.
    #[must_use]
    pub fn service<T, F>(mut self, lifetime: ServiceLifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn ServiceResolver) -> T + Send + Sync + 'static,
    {
        self.services.add(lifetime, None, factory);
        self
    }

    /// Registers a keyed service factory with a lifetime.
    #[must_use]
    pub fn keyed_service<T, F>(mut self, key: &str, lifetime: ServiceLifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn ServiceResolver) -> T + Send + Sync + 'static,
    {
        self.services.add(lifetime, Some(key), factory);
        self
    }

    /// Registers an existing instance as a singleton service.
    #[must_use]
    pub fn instance<T: Send + Sync + 'static>(mut self, instance: T) -> Self {
        self.services.add_instance(instance);
        self
    }

    /// Registers a pipeline.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.registry.register(pipeline);
        self
    }

    /// Registers a pipeline from a builder, deferring any build error to
    /// [`build`](Self::build).
    #[must_use]
    pub fn pipeline_from(mut self, builder: PipelineBuilder) -> Self {
        match builder.build() {
            Ok(pipeline) => {
                self.registry.register(pipeline);
            }
            Err(error) => self.errors.push(error),
        }
        self
    }

    /// Registers an [`EventHandler`] as a service with `lifetime` and a
    /// pipeline that resolves it for every `E`.
    #[must_use]
    pub fn event_handler<E, H, F>(mut self, lifetime: ServiceLifetime, factory: F) -> Self
    where
        E: Event,
        H: EventHandler<E>,
        F: Fn(&dyn ServiceResolver) -> H + Send + Sync + 'static,
    {
        self.services.add(lifetime, None, factory);
        self.pipeline_from(PipelineBuilder::for_service::<E, H>(None))
    }

    /// Like [`event_handler`](Self::event_handler), with the handler
    /// registered and resolved under `key`.
    #[must_use]
    pub fn keyed_event_handler<E, H, F>(mut self, key: &str, lifetime: ServiceLifetime, factory: F) -> Self
    where
        E: Event,
        H: EventHandler<E>,
        F: Fn(&dyn ServiceResolver) -> H + Send + Sync + 'static,
    {
        self.services.add(lifetime, Some(key), factory);
        self.pipeline_from(PipelineBuilder::for_service::<E, H>(Some(key)))
    }

    /// Validates everything and starts the dispatch loop on the current
    /// tokio runtime.
    pub fn build(self) -> Result<Broker, BrokerError> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error.into());
        }
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BrokerError::RuntimeUnavailable)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();
        let dynamic = Arc::new(DynamicHandlerRegistry::new());
        let pools = BrokerPools::new(self.config.pool_capacity());
        let retry_queue = Arc::new(RetryQueue::new(
            sender.clone(),
            cancellation.clone(),
            self.config.retry_tick(),
            self.config.retry_tolerance(),
        ));

        info!(
            max_concurrent_handlers = self.config.max_concurrent_handlers,
            pipelines = self.registry.len(),
            services = self.services.len(),
            "Starting broker"
        );

        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::new(self.registry),
            dynamic: Arc::clone(&dynamic),
            gate: Arc::new(Semaphore::new(self.config.max_concurrent_handlers)),
            pools: pools.clone(),
            retry_queue: Arc::clone(&retry_queue),
            services: self.services.build(),
            cancellation: cancellation.clone(),
            log_missing_handlers: self.config.log_missing_handlers,
            sink: self.sink,
        });
        runtime.spawn(dispatcher.run(receiver));

        Ok(Broker::from_inner(Arc::new(BrokerInner {
            sender: RwLock::new(Some(sender)),
            cancellation,
            dynamic,
            retry_queue,
            pools,
        })))
    }
}

impl std::fmt::Debug for BrokerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBuilder")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("pipelines", &self.registry.len())
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}
