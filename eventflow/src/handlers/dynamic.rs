//! Handlers added and removed while the broker is running.

use crate::pipeline::Pipeline;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Identifies every pipeline added by one registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimTicket(Uuid);

impl ClaimTicket {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ClaimTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Pipelines registered together under one ticket.
#[derive(Debug, Default)]
pub struct HandlerRegistrationSet {
    pipelines: Vec<Pipeline>,
}

impl HandlerRegistrationSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pipeline to the set.
    #[must_use]
    pub fn with(mut self, pipeline: Pipeline) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    /// Adds a pipeline to the set.
    pub fn add(&mut self, pipeline: Pipeline) -> &mut Self {
        self.pipelines.push(pipeline);
        self
    }

    /// Returns the number of pipelines in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// A dynamically registered pipeline.
#[derive(Debug, Clone)]
pub struct DynamicEntry {
    /// The ticket it was registered under.
    pub ticket: ClaimTicket,
    /// The pipeline.
    pub pipeline: Arc<Pipeline>,
}

/// Routing table for dynamically registered pipelines.
///
/// Each event type maps to an immutable snapshot that is replaced on every
/// write, so the dispatcher never observes a partial update.
#[derive(Debug, Default)]
pub struct DynamicHandlerRegistry {
    routes: Mutex<HashMap<TypeId, Arc<Vec<DynamicEntry>>>>,
}

impl DynamicHandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every pipeline in `set` under a fresh ticket.
    pub fn add(&self, set: HandlerRegistrationSet) -> ClaimTicket {
        let ticket = ClaimTicket::new();
        let count = set.pipelines.len();

        let mut by_event: HashMap<TypeId, Vec<DynamicEntry>> = HashMap::new();
        for pipeline in set.pipelines {
            by_event
                .entry(pipeline.event().id())
                .or_default()
                .push(DynamicEntry {
                    ticket,
                    pipeline: Arc::new(pipeline),
                });
        }

        let mut routes = self.routes.lock();
        for (event, added) in by_event {
            let updated = match routes.get(&event) {
                Some(current) => current.iter().cloned().chain(added).collect(),
                None => added,
            };
            routes.insert(event, Arc::new(updated));
        }
        drop(routes);

        debug!(ticket = %ticket, pipelines = count, "Added dynamic handlers");
        ticket
    }

    /// Removes every pipeline registered under `ticket`. Unknown tickets are
    /// ignored.
    pub fn remove(&self, ticket: ClaimTicket) {
        self.remove_range(std::iter::once(ticket));
    }

    /// Removes every pipeline registered under any of `tickets`.
    pub fn remove_range<I>(&self, tickets: I)
    where
        I: IntoIterator<Item = ClaimTicket>,
    {
        let tickets: Vec<ClaimTicket> = tickets.into_iter().collect();
        if tickets.is_empty() {
            return;
        }

        let mut routes = self.routes.lock();
        let mut removed = 0usize;
        routes.retain(|_, entries| {
            if !entries.iter().any(|e| tickets.contains(&e.ticket)) {
                return true;
            }
            let kept: Vec<DynamicEntry> = entries
                .iter()
                .filter(|e| !tickets.contains(&e.ticket))
                .cloned()
                .collect();
            removed += entries.len() - kept.len();
            if kept.is_empty() {
                return false;
            }
            *entries = Arc::new(kept);
            true
        });
        drop(routes);

        if removed > 0 {
            debug!(tickets = tickets.len(), pipelines = removed, "Removed dynamic handlers");
        }
    }

    /// Returns the current snapshot for an event type.
    #[must_use]
    pub fn snapshot(&self, event: TypeId) -> Option<Arc<Vec<DynamicEntry>>> {
        self.routes.lock().get(&event).cloned()
    }

    /// Returns the pipelines currently registered for an event type.
    #[must_use]
    pub fn pipelines(&self, event: TypeId) -> Vec<Arc<Pipeline>> {
        self.snapshot(event)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.pipeline)).collect())
            .unwrap_or_default()
    }

    /// Returns true if any pipeline is registered under `ticket`.
    #[must_use]
    pub fn contains(&self, ticket: ClaimTicket) -> bool {
        self.routes
            .lock()
            .values()
            .any(|entries| entries.iter().any(|e| e.ticket == ticket))
    }

    /// Returns the number of registered pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.lock().values().map(|entries| entries.len()).sum()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    /// Returns the number of event types with at least one pipeline.
    #[must_use]
    pub fn event_type_count(&self) -> usize {
        self.routes.lock().len()
    }
}
