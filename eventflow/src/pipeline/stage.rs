//! A named pipeline stage.

use super::invoker::{into_invoker, Argument, HandlerFn, HandlerFuture, HandlerInvoker};
use super::parameter::ParameterSpec;
use crate::errors::PipelineError;

/// One link of a pipeline: a terminal handler or a middleware.
pub struct Stage {
    name: String,
    invoker: HandlerInvoker,
    parameters: Vec<ParameterSpec>,
}

impl Stage {
    /// Creates a stage from an async function.
    pub fn new<H, Args>(name: impl Into<String>, handler: H) -> Self
    where
        H: HandlerFn<Args>,
        Args: 'static,
    {
        let name = name.into();
        Self {
            invoker: into_invoker(handler, name.clone()),
            parameters: H::parameters(),
            name,
        }
    }

    /// Returns the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parameter list in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub(crate) fn parameters_mut(&mut self) -> &mut [ParameterSpec] {
        &mut self.parameters
    }

    pub(crate) fn invoke(&self, arguments: Vec<Argument>) -> Result<HandlerFuture, PipelineError> {
        (self.invoker)(arguments)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
