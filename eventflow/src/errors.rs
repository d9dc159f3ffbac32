//! Error types for the broker.
//!
//! Configuration errors surface synchronously while wiring the broker,
//! publish errors are returned to the caller, and everything that happens
//! inside a pipeline run is captured as a [`PipelineError`].

use crate::pipeline::ResolutionRule;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the broker facade.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker has been shut down and no longer accepts events.
    #[error("Publish unavailable: the broker has been shut down")]
    PublishUnavailable,

    /// The caller's cancellation token was cancelled before the write.
    #[error("Publish cancelled: {reason}")]
    PublishCancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// An argument was outside its accepted range.
    #[error("Argument out of range: {name} ({reason})")]
    ArgumentOutOfRange {
        /// The argument name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The broker was built outside a tokio runtime.
    #[error("No tokio runtime available to start the dispatch loop")]
    RuntimeUnavailable,

    /// The broker configuration or a registration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while configuring the broker or building pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `max_concurrent_handlers` must be positive and within the semaphore
    /// permit limit.
    #[error("max_concurrent_handlers must be positive and at most the semaphore permit limit, got {0}")]
    InvalidConcurrency(usize),

    /// A retry timing value is invalid.
    #[error("Invalid retry timing: {0}")]
    InvalidRetryTiming(String),

    /// A pipeline registration is malformed.
    #[error("Invalid registration for '{event}': {reason}")]
    InvalidRegistration {
        /// The event type name.
        event: &'static str,
        /// What is wrong with the registration.
        reason: String,
    },

    /// A configuration document could not be parsed.
    #[error("Invalid configuration document: {0}")]
    Parse(String),
}

impl ConfigError {
    /// Creates an invalid registration error.
    #[must_use]
    pub fn registration(event: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRegistration {
            event,
            reason: reason.into(),
        }
    }
}

/// Error raised when a stage parameter cannot be resolved.
///
/// Carries the full rule that was applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unable to resolve parameter #{position} of type '{type_name}' for stage '{stage}' ({rule})")]
pub struct ResolutionError {
    /// The stage whose parameter failed.
    pub stage: String,
    /// The zero-based parameter position.
    pub position: usize,
    /// The parameter type name.
    pub type_name: &'static str,
    /// The rule that was applied.
    pub rule: ResolutionRule,
}

/// The single failure captured by a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A parameter could not be resolved; the stage never ran.
    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    /// A stage returned an error.
    #[error("Handler failed: {0}")]
    Handler(Arc<anyhow::Error>),

    /// A resolved argument did not match the parameter type.
    #[error("Argument mismatch for stage '{stage}' at position {position}: expected '{expected}'")]
    ArgumentMismatch {
        /// The stage name.
        stage: String,
        /// The zero-based parameter position.
        position: usize,
        /// The expected parameter type.
        expected: &'static str,
    },

    /// The run was cancelled before it started.
    #[error("Pipeline cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Wraps a handler error.
    #[must_use]
    pub fn handler(error: anyhow::Error) -> Self {
        Self::Handler(Arc::new(error))
    }

    /// Returns true for resolution failures.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }

    /// Returns true for handler failures.
    #[must_use]
    pub const fn is_handler(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    /// Returns a short label used in logs and sink payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Handler(_) => "handler",
            Self::ArgumentMismatch { .. } => "argument_mismatch",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    /// Recovers a `PipelineError` that travelled through `?` inside a stage,
    /// wrapping anything else as a handler failure.
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(original) => original,
            Err(other) => Self::handler(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolution_error() -> ResolutionError {
        ResolutionError {
            stage: "handler".to_string(),
            position: 1,
            type_name: "Database",
            rule: ResolutionRule::default().with_key("primary"),
        }
    }

    #[test]
    fn test_resolution_error_embeds_rule() {
        let message = resolution_error().to_string();

        assert!(message.contains("Database"));
        assert!(message.contains("#1"));
        assert!(message.contains("key=primary"));
    }

    #[test]
    fn test_pipeline_error_round_trips_through_anyhow() {
        let original = PipelineError::from(resolution_error());
        let through_anyhow: anyhow::Error = original.into();

        let recovered = PipelineError::from(through_anyhow);
        assert!(recovered.is_resolution());
    }

    #[test]
    fn test_foreign_error_becomes_handler_failure() {
        let recovered = PipelineError::from(anyhow::anyhow!("boom"));

        assert!(recovered.is_handler());
        assert_eq!(recovered.kind(), "handler");
        assert!(recovered.to_string().contains("boom"));
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::InvalidConcurrency(0).to_string(),
            "max_concurrent_handlers must be positive and at most the semaphore permit limit, got 0"
        );
        let err = ConfigError::registration("Event1", "missing terminal handler");
        assert!(err.to_string().contains("Event1"));
    }
}
