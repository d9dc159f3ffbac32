//! Execution contexts.
//!
//! - [`RunContext`]: the type-keyed bag stages read and write during a run
//! - [`ExecutionContext`]: the dispatcher's pooled bookkeeping for one run

mod execution;
mod run;

pub use execution::ExecutionContext;
pub use run::RunContext;
