//! Handler-driven retries.
//!
//! A handler requests redelivery through the [`RetryPolicy`] found in its
//! run context. When the execution completes the dispatcher wraps the event,
//! policy and pipeline in a [`RetryDescriptor`] and parks it on the
//! [`RetryQueue`] until it is due.

mod backoff;
mod descriptor;
mod policy;
mod queue;

pub use backoff::{Backoff, BackoffStrategy, JitterStrategy};
pub use descriptor::RetryDescriptor;
pub use policy::RetryPolicy;
pub use queue::RetryQueue;
