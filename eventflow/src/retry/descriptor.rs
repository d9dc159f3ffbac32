//! Retry descriptors binding an event to the pipeline that asked for it.

use super::RetryPolicy;
use crate::dispatch::PublishedEvent;
use crate::pipeline::Pipeline;
use crate::pool::Pooled;
use std::sync::Arc;

/// A pending redelivery of one event to one pipeline.
///
/// Created on the first retry request for a pair and reused for later
/// attempts. Owns the policy lease, which returns to its pool when the
/// descriptor is dropped.
pub struct RetryDescriptor {
    event: PublishedEvent,
    policy: Pooled<Arc<RetryPolicy>>,
    pipeline: Arc<Pipeline>,
}

impl RetryDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(event: PublishedEvent, policy: Pooled<Arc<RetryPolicy>>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            event,
            policy,
            pipeline,
        }
    }

    /// Returns the event to redeliver.
    #[must_use]
    pub const fn event(&self) -> &PublishedEvent {
        &self.event
    }

    /// Returns the policy shared by every attempt.
    #[must_use]
    pub fn policy(&self) -> &Arc<RetryPolicy> {
        &self.policy
    }

    /// Returns the pipeline the retry is bound to.
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Returns the number of executions so far.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.policy.attempt()
    }
}

impl std::fmt::Debug for RetryDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryDescriptor")
            .field("event", &self.event.key())
            .field("pipeline", &self.pipeline.name())
            .field("attempt", &self.attempt())
            .finish()
    }
}
