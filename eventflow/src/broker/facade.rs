//! The broker facade.

use crate::cancellation::CancellationToken;
use crate::core::Event;
use crate::dispatch::{DispatchItem, PublishedEvent};
use crate::errors::BrokerError;
use crate::handlers::DynamicHandlerRegistry;
use crate::pool::{BrokerPoolStats, BrokerPools};
use crate::retry::RetryQueue;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use super::BrokerBuilder;

pub(crate) struct BrokerInner {
    pub(crate) sender: RwLock<Option<UnboundedSender<DispatchItem>>>,
    pub(crate) cancellation: CancellationToken,
    pub(crate) dynamic: Arc<DynamicHandlerRegistry>,
    pub(crate) retry_queue: Arc<RetryQueue>,
    pub(crate) pools: BrokerPools,
}

impl BrokerInner {
    fn send(&self, event: PublishedEvent) -> Result<(), BrokerError> {
        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            return Err(BrokerError::PublishUnavailable);
        };
        sender
            .send(DispatchItem::Event(event))
            .map_err(|_| BrokerError::PublishUnavailable)
    }

    fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            debug!("Broker shutting down");
        }
        self.cancellation.cancel("broker shut down");
    }
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        self.cancellation.cancel("broker dropped");
    }
}

/// An in-process publish/subscribe event broker.
///
/// Cheap to clone; every clone publishes into the same queue. The engine
/// stops when [`shutdown`](Self::shutdown) is called or the last handle is
/// dropped.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    pub(crate) fn from_inner(inner: Arc<BrokerInner>) -> Self {
        Self { inner }
    }

    /// Starts building a broker.
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Publishes an event to every pipeline registered for its type.
    ///
    /// The queue is unbounded, so this never waits.
    pub fn publish<E: Event>(&self, event: E) -> Result<(), BrokerError> {
        self.publish_arc(Arc::new(event))
    }

    /// Publishes an already shared event instance.
    pub fn publish_arc<E: Event>(&self, event: Arc<E>) -> Result<(), BrokerError> {
        trace!(event_type = %std::any::type_name::<E>(), "Publishing event");
        self.inner.send(PublishedEvent::from_arc(event))
    }

    /// Publishes an event unless `token` is already cancelled.
    pub fn publish_with<E: Event>(&self, event: E, token: &CancellationToken) -> Result<(), BrokerError> {
        if token.is_cancelled() {
            return Err(BrokerError::PublishCancelled {
                reason: token.reason().unwrap_or_default(),
            });
        }
        self.publish(event)
    }

    /// Publishes an event after `delay` from an independent timer task.
    ///
    /// Rejects a zero delay. Anything that goes wrong while waiting,
    /// including shutdown, is silently dropped.
    pub fn publish_deferred<E: Event>(&self, event: E, delay: Duration) -> Result<(), BrokerError> {
        if delay.is_zero() {
            return Err(BrokerError::ArgumentOutOfRange {
                name: "delay",
                reason: "must be greater than zero".to_string(),
            });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BrokerError::RuntimeUnavailable)?;

        let inner: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        let cancellation = self.inner.cancellation.clone();
        let event = PublishedEvent::new(event);
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    trace!("Deferred publish abandoned");
                }
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = inner.upgrade() {
                        if let Err(error) = inner.send(event) {
                            trace!(error = %error, "Deferred publish dropped");
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Stops accepting events and cancels the engine. Idempotent.
    ///
    /// Queued events that have not started are abandoned.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Returns true once the broker has been shut down.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.sender.read().is_none() || self.inner.cancellation.is_cancelled()
    }

    /// Returns the dynamic handler registry.
    #[must_use]
    pub fn dynamic_handlers(&self) -> &DynamicHandlerRegistry {
        &self.inner.dynamic
    }

    /// Returns the number of retries waiting on the retry queue.
    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.inner.retry_queue.len()
    }

    /// Returns a snapshot of the object pool counters.
    #[must_use]
    pub fn pool_stats(&self) -> BrokerPoolStats {
        self.inner.pools.stats()
    }

    /// Returns the broker-wide cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("shut_down", &self.is_shut_down())
            .field("dynamic_handlers", &self.inner.dynamic.len())
            .field("pending_retries", &self.pending_retries())
            .finish()
    }
}
