//! Error boundary stage forwarding handler failures to a callback.

use super::next::Next;
use super::stage::Stage;
use crate::context::RunContext;
use crate::errors::PipelineError;
use crate::events::ERROR_CALLBACK_FAILED;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback receiving a handler failure and the run's context.
pub type ErrorCallback =
    Arc<dyn Fn(Arc<anyhow::Error>, RunContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Name of the stage inserted around the terminal handler.
pub const ERROR_BOUNDARY_STAGE: &str = "error-boundary";

/// Builds the stage placed directly around the terminal handler.
///
/// Only handler failures reach the callback; resolution and argument errors
/// pass through unchanged. A failing callback is reported and suppressed.
pub(crate) fn error_boundary(callback: ErrorCallback, pipeline: String) -> Stage {
    Stage::new(ERROR_BOUNDARY_STAGE, move |next: Next, context: RunContext| {
        let callback = Arc::clone(&callback);
        let pipeline = pipeline.clone();
        async move {
            match next.run().await {
                Err(PipelineError::Handler(error)) => {
                    debug!(pipeline = %pipeline, error = %error, "Forwarding handler failure to error callback");
                    if let Err(failure) = callback(error, context.clone()).await {
                        report_callback_failure(&context, &pipeline, &failure);
                    }
                    Ok(())
                }
                other => other.map_err(anyhow::Error::from),
            }
        }
    })
}

/// Logs and emits a suppressed error-callback failure.
pub(crate) fn report_callback_failure(context: &RunContext, pipeline: &str, failure: &anyhow::Error) {
    warn!(pipeline = %pipeline, error = %failure, "Error callback failed, suppressing");
    if let Some(sink) = context.sink() {
        sink.try_emit(
            ERROR_CALLBACK_FAILED,
            Some(serde_json::json!({
                "pipeline": pipeline,
                "error": failure.to_string(),
            })),
        );
    }
}
