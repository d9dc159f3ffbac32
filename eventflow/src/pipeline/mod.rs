//! Middleware pipelines.
//!
//! This module provides:
//! - Stage adapters for plain async functions
//! - Per-parameter resolution rules over services and the run context
//! - The pipeline builder with validation
//! - The onion execution engine

mod boundary;
mod builder;
mod definition;
mod invoker;
mod next;
mod parameter;
mod pipeline_tests;
mod registry;
mod stage;

pub use boundary::{ErrorCallback, ERROR_BOUNDARY_STAGE};
pub use builder::{PipelineBuilder, TERMINAL_STAGE};
pub use definition::Pipeline;
pub use invoker::{Argument, HandlerFn, HandlerFuture, HandlerInvoker, HandlerParam};
pub use next::Next;
pub use parameter::{NotFound, ParameterKind, ParameterSpec, ResolutionRule, Source};
pub use registry::PipelineRegistry;
pub use stage::Stage;
