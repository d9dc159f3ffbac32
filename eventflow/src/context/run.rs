//! Per-execution context bag.

use crate::cancellation::CancellationToken;
use crate::core::{AnyValue, TypeKey};
use crate::events::EventSink;
use crate::pool::Poolable;
use crate::retry::RetryPolicy;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct ContextInner {
    values: RwLock<HashMap<TypeId, AnyValue>>,
    cancellation: RwLock<Option<CancellationToken>>,
    sink: RwLock<Option<Arc<dyn EventSink>>>,
}

/// A type-keyed bag of values shared by the stages of one execution.
///
/// The dispatcher seeds it with the event, the [`RetryPolicy`] and the run's
/// cancellation token. Stages may add or replace entries; later stages see
/// the changes. Cloning shares the same bag.
#[derive(Clone, Default)]
pub struct RunContext {
    inner: Arc<ContextInner>,
}

impl RunContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value keyed by its type, returning true if it replaced one.
    pub fn insert<T: Send + Sync + 'static>(&self, value: Arc<T>) -> bool {
        self.insert_value(TypeKey::of::<T>(), value)
    }

    /// Inserts a type-erased value under an explicit key.
    pub fn insert_value(&self, key: TypeKey, value: AnyValue) -> bool {
        self.inner.values.write().insert(key.id(), value).is_some()
    }

    /// Returns the value stored for `T`.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get_value(TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns the type-erased value stored under `type_id`.
    #[must_use]
    pub fn get_value(&self, type_id: TypeId) -> Option<AnyValue> {
        self.inner.values.read().get(&type_id).cloned()
    }

    /// Returns true if a value is stored for `T`.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.inner.values.read().contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns the value stored for `T`.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .values
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.values.read().len()
    }

    /// Returns true if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.values.read().is_empty()
    }

    /// Returns the retry policy for this execution.
    #[must_use]
    pub fn retry_policy(&self) -> Option<Arc<RetryPolicy>> {
        self.get::<RetryPolicy>()
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.inner.cancellation.read().clone()
    }

    /// Returns true if the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .cancellation
            .read()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Sets the run's cancellation token.
    pub fn set_cancellation(&self, token: CancellationToken) {
        *self.inner.cancellation.write() = Some(token);
    }

    pub(crate) fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.inner.sink.read().clone()
    }

    /// Returns true if both handles share one bag.
    #[must_use]
    pub fn same_context(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Poolable for RunContext {
    fn reset(&mut self) -> bool {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => {
                inner.values.get_mut().clear();
                *inner.cancellation.get_mut() = None;
                *inner.sink.get_mut() = None;
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("values", &self.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct UserId(u64);

    #[test]
    fn test_insert_get_remove() {
        let ctx = RunContext::new();
        assert!(ctx.is_empty());

        assert!(!ctx.insert(Arc::new(UserId(7))));
        assert!(ctx.insert(Arc::new(UserId(8))));

        assert!(ctx.contains::<UserId>());
        assert_eq!(ctx.get::<UserId>().as_deref(), Some(&UserId(8)));
        assert_eq!(ctx.remove::<UserId>().as_deref(), Some(&UserId(8)));
        assert!(ctx.get::<UserId>().is_none());
    }

    #[test]
    fn test_clones_share_values() {
        let ctx = RunContext::new();
        let other = ctx.clone();

        other.insert(Arc::new(UserId(1)));

        assert!(ctx.same_context(&other));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_retry_policy_and_cancellation_slots() {
        let ctx = RunContext::new();
        let policy = Arc::new(RetryPolicy::new());
        let token = CancellationToken::new();

        ctx.insert(policy.clone());
        ctx.set_cancellation(token.clone());
        token.cancel("stop");

        assert!(ctx.retry_policy().is_some_and(|p| Arc::ptr_eq(&p, &policy)));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_reset_requires_exclusive_handle() {
        let mut ctx = RunContext::new();
        ctx.insert(Arc::new(UserId(1)));
        ctx.set_cancellation(CancellationToken::new());

        let held = ctx.clone();
        assert!(!ctx.reset());
        drop(held);

        assert!(ctx.reset());
        assert!(ctx.is_empty());
        assert!(ctx.cancellation().is_none());
    }
}
