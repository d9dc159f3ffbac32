//! Cooperative cancellation.
//!
//! One broker-wide [`CancellationToken`] is raised by `Broker::shutdown` and
//! observed by the dispatch loop, the retry poller, deferred publishes and
//! any handler that asks for it.

mod token;

pub use token::{CancelCallback, CancellationToken};
