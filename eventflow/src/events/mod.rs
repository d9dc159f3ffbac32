//! Observability events emitted by the broker.
//!
//! Sinks receive structured notifications alongside the `tracing` output so
//! callers (and tests) can observe unmatched events, failures and retries.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// An event was published with no static or dynamic pipeline for its type.
pub const UNHANDLED_EVENT: &str = "broker.unhandled_event";
/// A pipeline run ended with a stage failure.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A stage parameter could not be resolved.
pub const RESOLUTION_FAILED: &str = "pipeline.resolution_failed";
/// A handler's error callback failed; the failure was suppressed.
pub const ERROR_CALLBACK_FAILED: &str = "handler.error_callback_failed";
/// A retry was scheduled on the retry queue.
pub const RETRY_SCHEDULED: &str = "retry.scheduled";
