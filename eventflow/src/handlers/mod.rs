//! Event handlers.
//!
//! - [`EventHandler`]: trait-object handlers resolved from services
//! - [`DynamicHandlerRegistry`]: pipelines added and removed at runtime,
//!   claimed by [`ClaimTicket`]

mod dynamic;
mod event_handler;

pub use dynamic::{ClaimTicket, DynamicEntry, DynamicHandlerRegistry, HandlerRegistrationSet};
pub use event_handler::EventHandler;
