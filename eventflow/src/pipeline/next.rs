//! Continuation handed to middleware stages.

use super::definition::{execute_stage, PipelineRun};
use crate::context::RunContext;
use crate::errors::PipelineError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;

type InnerChain = Shared<BoxFuture<'static, Result<(), PipelineError>>>;

struct NextInner {
    run: Arc<PipelineRun>,
    inner_stage: Option<usize>,
    // Set on the first call and never replaced, so a dropped caller cannot
    // cause a second start.
    started: Mutex<Option<InnerChain>>,
}

/// Runs the rest of the chain inside the current stage.
///
/// The first call starts the inner stages. Later calls, including calls from
/// clones and calls after an earlier caller gave up waiting, await that same
/// execution and never start another. Not calling it short-circuits the
/// chain.
#[derive(Clone)]
pub struct Next {
    inner: Arc<NextInner>,
}

impl Next {
    pub(crate) fn new(run: Arc<PipelineRun>, inner_stage: Option<usize>) -> Self {
        Self {
            inner: Arc::new(NextInner {
                run,
                inner_stage,
                started: Mutex::new(None),
            }),
        }
    }

    /// Runs the inner stages once and returns their outcome.
    pub async fn run(&self) -> Result<(), PipelineError> {
        let chain = self
            .inner
            .started
            .lock()
            .get_or_insert_with(|| self.start())
            .clone();
        chain.await
    }

    fn start(&self) -> InnerChain {
        match self.inner.inner_stage {
            Some(index) => execute_stage(Arc::clone(&self.inner.run), index),
            None => futures::future::ready(Ok(())).boxed(),
        }
        .shared()
    }

    /// Returns true once the inner stages have finished.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.inner
            .started
            .lock()
            .as_ref()
            .is_some_and(|chain| chain.peek().is_some())
    }

    /// Returns true once the inner stages have been started.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.lock().is_some()
    }

    /// Returns true if there is no inner stage.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.inner_stage.is_none()
    }

    /// Returns the run's context bag.
    #[must_use]
    pub fn context(&self) -> &RunContext {
        self.inner.run.context()
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("inner_stage", &self.inner.inner_stage)
            .field("has_run", &self.has_run())
            .finish()
    }
}
