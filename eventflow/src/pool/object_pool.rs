//! Bounded free-list pool with RAII return guards.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A value that can be recycled through an [`ObjectPool`].
pub trait Poolable: Default + Send + 'static {
    /// Clears the value for reuse.
    ///
    /// Returns false when the value cannot be recycled (for example because
    /// it is still shared), in which case the pool discards it.
    fn reset(&mut self) -> bool;
}

/// Counters describing pool behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Instances created because the free list was empty.
    pub created: u64,
    /// Rentals served from the free list.
    pub reused: u64,
    /// Returned instances dropped instead of recycled.
    pub discarded: u64,
    /// Instances currently on the free list.
    pub available: usize,
}

/// A free list of reusable instances.
pub struct ObjectPool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Poolable> ObjectPool<T> {
    /// Creates an empty pool keeping at most `capacity` idle instances.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            capacity,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Rents an instance. It returns to the pool when the guard drops.
    #[must_use]
    pub fn rent(self: &Arc<Self>) -> Pooled<T> {
        let item = match self.items.lock().pop() {
            Some(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        };

        Pooled {
            item: Some(item),
            pool: Arc::clone(self),
        }
    }

    /// Returns the maximum number of idle instances kept.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of idle instances.
    #[must_use]
    pub fn available(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns a snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            available: self.available(),
        }
    }

    fn give_back(&self, mut item: T) {
        if item.reset() {
            let mut items = self.items.lock();
            if items.len() < self.capacity {
                items.push(item);
                return;
            }
        }
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity)
            .field("available", &self.items.lock().len())
            .finish()
    }
}

/// A rented instance, returned to its pool on drop.
pub struct Pooled<T: Poolable> {
    item: Option<T>,
    pool: Arc<ObjectPool<T>>,
}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled item is only taken on drop"),
        }
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled item is only taken on drop"),
        }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

impl<T: Poolable + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}
