//! Event dispatch.
//!
//! Published events and due retries share one unbounded queue, drained by a
//! single [`Dispatcher`] loop.

mod engine;
mod item;

pub use engine::Dispatcher;
pub use item::{DispatchItem, PublishedEvent};
