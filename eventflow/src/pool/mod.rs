//! Object pools for per-execution state.
//!
//! The dispatch hot path rents its retry policies, run contexts and
//! execution contexts from these pools instead of allocating them per
//! (event, pipeline) pair.

mod object_pool;

pub use object_pool::{ObjectPool, PoolStats, Poolable, Pooled};

use crate::context::{ExecutionContext, RunContext};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshot of every broker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPoolStats {
    /// Retry policy pool.
    pub policies: PoolStats,
    /// Run context pool.
    pub contexts: PoolStats,
    /// Execution context pool.
    pub executions: PoolStats,
}

/// The pools shared by the dispatcher and its workers.
#[derive(Debug, Clone)]
pub struct BrokerPools {
    /// Retry policies, leased for the lifetime of a chain of attempts.
    pub policies: Arc<ObjectPool<Arc<RetryPolicy>>>,
    /// Run contexts, one per execution.
    pub contexts: Arc<ObjectPool<RunContext>>,
    /// Execution contexts, one per execution.
    pub executions: Arc<ObjectPool<ExecutionContext>>,
}

impl BrokerPools {
    /// Creates pools keeping at most `capacity` idle instances each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            policies: Arc::new(ObjectPool::new(capacity)),
            contexts: Arc::new(ObjectPool::new(capacity)),
            executions: Arc::new(ObjectPool::new(capacity)),
        }
    }

    /// Returns a snapshot of every pool.
    #[must_use]
    pub fn stats(&self) -> BrokerPoolStats {
        BrokerPoolStats {
            policies: self.policies.stats(),
            contexts: self.contexts.stats(),
            executions: self.executions.stats(),
        }
    }
}
