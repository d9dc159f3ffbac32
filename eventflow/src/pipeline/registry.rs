//! Static pipeline registrations, fixed when the broker is built.

use super::definition::Pipeline;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Pipelines registered up front, grouped by event type in registration
/// order.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    by_event: HashMap<TypeId, Vec<Arc<Pipeline>>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pipeline for its event type.
    pub fn register(&mut self, pipeline: Pipeline) -> Arc<Pipeline> {
        let pipeline = Arc::new(pipeline);
        self.by_event
            .entry(pipeline.event().id())
            .or_default()
            .push(Arc::clone(&pipeline));
        pipeline
    }

    /// Returns the pipelines for an exact event type.
    #[must_use]
    pub fn pipelines_for(&self, event: TypeId) -> &[Arc<Pipeline>] {
        self.by_event.get(&event).map_or(&[], Vec::as_slice)
    }

    /// Returns the number of registered pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_event.values().map(Vec::len).sum()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }

    /// Returns the number of event types with at least one pipeline.
    #[must_use]
    pub fn event_type_count(&self) -> usize {
        self.by_event.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;

    struct Event1;
    struct Event2;

    fn pipeline<E: Send + Sync + 'static>(name: &str) -> Pipeline {
        PipelineBuilder::for_event::<E>()
            .named(name)
            .handler(|| async { anyhow::Ok(()) })
            .build()
            .unwrap()
    }

    #[test]
    fn test_groups_by_exact_type_in_order() {
        let mut registry = PipelineRegistry::new();
        registry.register(pipeline::<Event1>("a"));
        registry.register(pipeline::<Event2>("b"));
        registry.register(pipeline::<Event1>("c"));

        let names: Vec<_> = registry
            .pipelines_for(TypeId::of::<Event1>())
            .iter()
            .map(|p| p.name().to_string())
            .collect();

        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.event_type_count(), 2);
        assert!(registry.pipelines_for(TypeId::of::<u8>()).is_empty());
    }
}
