//! # Eventflow
//!
//! An in-process publish/subscribe event broker.
//!
//! Eventflow routes typed events to handler pipelines with support for:
//!
//! - **Middleware pipelines**: Onion-style stages around a terminal handler
//! - **Parameter resolution**: Stage arguments injected from services or the run context
//! - **Bounded concurrency**: A global budget on simultaneously running pipelines
//! - **Retries**: Handlers request redelivery through a per-event retry policy
//! - **Dynamic handlers**: Pipelines added and removed at runtime with claim tickets
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eventflow::prelude::*;
//!
//! let broker = Broker::builder()
//!     .max_concurrent_handlers(4)
//!     .pipeline(
//!         PipelineBuilder::for_event::<OrderPlaced>()
//!             .wrap(|next: Next| async move {
//!                 tracing::info!("before");
//!                 next.run().await?;
//!                 anyhow::Ok(())
//!             })
//!             .handler(|order: Arc<OrderPlaced>, policy: Arc<RetryPolicy>| async move {
//!                 if order.flaky && policy.attempt() < 3 {
//!                     policy.retry_after(Duration::from_millis(100));
//!                 }
//!                 anyhow::Ok(())
//!             })
//!             .build()?,
//!     )
//!     .build()?;
//!
//! broker.publish(OrderPlaced { id: 7, flaky: true })?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod broker;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod services;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::broker::{Broker, BrokerBuilder};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::BrokerConfig;
    pub use crate::context::RunContext;
    pub use crate::core::Event;
    pub use crate::errors::{BrokerError, ConfigError, PipelineError, ResolutionError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::handlers::{ClaimTicket, EventHandler, HandlerRegistrationSet};
    pub use crate::pipeline::{
        Next, NotFound, Pipeline, PipelineBuilder, ResolutionRule, Source,
    };
    pub use crate::retry::{Backoff, RetryPolicy};
    pub use crate::services::{ServiceLifetime, ServiceProvider, ServiceResolver, ServiceResolverExt};
}
