//! Trait-object event handlers resolved from the service registry.

use crate::context::RunContext;
use crate::core::Event;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// A handler for events of type `E`.
///
/// Registered with a service lifetime through
/// [`BrokerBuilder::event_handler`](crate::broker::BrokerBuilder::event_handler);
/// each execution resolves an instance from the run's service scope.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// Handles one event.
    async fn handle(&self, event: Arc<E>, context: RunContext) -> anyhow::Result<()>;

    /// Called when [`handle`](Self::handle) fails.
    ///
    /// An error returned from here is logged and suppressed.
    async fn on_error(&self, error: Arc<anyhow::Error>, context: RunContext) -> anyhow::Result<()> {
        let _ = context;
        error!(
            event_type = %std::any::type_name::<E>(),
            error = %error,
            "Event handler failed"
        );
        Ok(())
    }
}
