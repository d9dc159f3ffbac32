//! Units of work carried by the dispatch queue.

use crate::core::{AnyValue, Event, TypeKey};
use crate::retry::RetryDescriptor;
use std::sync::Arc;

/// A published event with its routing key.
///
/// Cloning shares the event allocation.
#[derive(Clone)]
pub struct PublishedEvent {
    key: TypeKey,
    value: AnyValue,
}

impl PublishedEvent {
    /// Wraps an event.
    #[must_use]
    pub fn new<E: Event>(event: E) -> Self {
        Self::from_arc(Arc::new(event))
    }

    /// Wraps an already shared event.
    #[must_use]
    pub fn from_arc<E: Event>(event: Arc<E>) -> Self {
        Self {
            key: TypeKey::of::<E>(),
            value: event,
        }
    }

    /// Returns the routing key.
    #[must_use]
    pub const fn key(&self) -> TypeKey {
        self.key
    }

    /// Returns the shared event value.
    #[must_use]
    pub const fn value(&self) -> &AnyValue {
        &self.value
    }

    /// Returns the event as `E` if it has that type.
    #[must_use]
    pub fn downcast<E: Event>(&self) -> Option<Arc<E>> {
        self.value.clone().downcast::<E>().ok()
    }

    /// Returns true if both refer to the same event instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl std::fmt::Debug for PublishedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedEvent")
            .field("type", &self.key)
            .finish_non_exhaustive()
    }
}

/// An item on the dispatch queue.
#[derive(Debug)]
pub enum DispatchItem {
    /// A freshly published event, routed by type.
    Event(PublishedEvent),
    /// A due retry, bound to its pipeline.
    Retry(RetryDescriptor),
}

impl DispatchItem {
    /// Returns the routing key of the carried event.
    #[must_use]
    pub fn event_key(&self) -> TypeKey {
        match self {
            Self::Event(event) => event.key(),
            Self::Retry(descriptor) => descriptor.event().key(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Event1(u32);

    #[test]
    fn test_published_event_keeps_instance() {
        let shared = Arc::new(Event1(7));
        let published = PublishedEvent::from_arc(shared.clone());
        let clone = published.clone();

        assert_eq!(published.key(), TypeKey::of::<Event1>());
        assert!(published.same_instance(&clone));
        assert!(published.downcast::<Event1>().is_some_and(|e| Arc::ptr_eq(&e, &shared)));
        assert!(published.downcast::<u32>().is_none());
    }

    #[test]
    fn test_dispatch_item_key() {
        let item = DispatchItem::Event(PublishedEvent::new(Event1(1)));

        assert_eq!(item.event_key().short_name(), "Event1");
    }
}
