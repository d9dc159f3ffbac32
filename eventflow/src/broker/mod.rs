//! The broker facade and its builder.
//!
//! ```rust,ignore
//! let broker = Broker::builder()
//!     .max_concurrent_handlers(4)
//!     .pipeline(
//!         PipelineBuilder::for_event::<OrderPlaced>()
//!             .handler(|order: Arc<OrderPlaced>| async move {
//!                 println!("order {}", order.id);
//!                 anyhow::Ok(())
//!             })
//!             .build()?,
//!     )
//!     .build()?;
//!
//! broker.publish(OrderPlaced { id: 7 })?;
//! ```

mod builder;
mod facade;

pub use builder::BrokerBuilder;
pub use facade::Broker;
