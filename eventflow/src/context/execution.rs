//! Pooled per-execution state.

use crate::cancellation::CancellationToken;
use crate::dispatch::PublishedEvent;
use crate::pipeline::Pipeline;
use crate::pool::{Poolable, Pooled};
use crate::retry::{RetryDescriptor, RetryPolicy};
use std::sync::Arc;

/// State for one run of one pipeline against one event.
///
/// Rented from the execution pool by the dispatcher and returned when the
/// worker finishes, on every exit path.
#[derive(Default)]
pub struct ExecutionContext {
    event: Option<PublishedEvent>,
    pipeline: Option<Arc<Pipeline>>,
    retry: Option<RetryDescriptor>,
    policy: Option<Pooled<Arc<RetryPolicy>>>,
    cancellation: Option<CancellationToken>,
}

impl ExecutionContext {
    /// Prepares a first delivery of `event` to `pipeline`.
    pub fn prepare(
        &mut self,
        event: PublishedEvent,
        pipeline: Arc<Pipeline>,
        policy: Pooled<Arc<RetryPolicy>>,
        cancellation: CancellationToken,
    ) {
        self.event = Some(event);
        self.pipeline = Some(pipeline);
        self.retry = None;
        self.policy = Some(policy);
        self.cancellation = Some(cancellation);
    }

    /// Prepares a redelivery described by `descriptor`.
    pub fn prepare_retry(&mut self, descriptor: RetryDescriptor, cancellation: CancellationToken) {
        self.event = Some(descriptor.event().clone());
        self.pipeline = Some(Arc::clone(descriptor.pipeline()));
        self.retry = Some(descriptor);
        self.policy = None;
        self.cancellation = Some(cancellation);
    }

    /// Returns the event being delivered.
    #[must_use]
    pub const fn event(&self) -> Option<&PublishedEvent> {
        self.event.as_ref()
    }

    /// Returns the pipeline being executed.
    #[must_use]
    pub const fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.as_ref()
    }

    /// Returns the cancellation token for this execution.
    #[must_use]
    pub const fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Returns true if this execution is a redelivery.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Returns the retry policy leased for this execution.
    #[must_use]
    pub fn policy(&self) -> Option<&Arc<RetryPolicy>> {
        match &self.retry {
            Some(descriptor) => Some(descriptor.policy()),
            None => self.policy.as_deref(),
        }
    }

    /// Takes the descriptor to reschedule, creating it from the leased
    /// policy on a first delivery.
    pub fn take_descriptor(&mut self) -> Option<RetryDescriptor> {
        if let Some(descriptor) = self.retry.take() {
            return Some(descriptor);
        }
        let event = self.event.clone()?;
        let pipeline = self.pipeline.clone()?;
        let policy = self.policy.take()?;
        Some(RetryDescriptor::new(event, policy, pipeline))
    }
}

impl Poolable for ExecutionContext {
    fn reset(&mut self) -> bool {
        *self = Self::default();
        true
    }
}
