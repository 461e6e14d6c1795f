//! Name-keyed construction of event queues.

use crate::binary_heap::{BinaryHeapQueue, BINARY_HEAP};
use crate::heap::{HeapLayout, SegmentedHeap, DEFAULT_WINDOW, SEGMENTED_HEAP};
use bigsim_common::{EventQueue, SimError};
use std::collections::BTreeMap;
use tracing::debug;

/// Queue kind used when no name is configured.
pub const DEFAULT_QUEUE: &str = SEGMENTED_HEAP;

/// Parameters handed to every queue factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Similarity window for batch removal, in ticks.
    pub window: i64,
    /// Segment geometry, used by segmented queues.
    pub layout: HeapLayout,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            window: DEFAULT_WINDOW,
            layout: HeapLayout::default(),
        }
    }
}

/// Builds a queue from options.
pub type QueueFactory = fn(&QueueOptions) -> Box<dyn EventQueue>;

fn segmented_heap(options: &QueueOptions) -> Box<dyn EventQueue> {
    Box::new(SegmentedHeap::with_layout(options.layout).with_window(options.window))
}

fn binary_heap(options: &QueueOptions) -> Box<dyn EventQueue> {
    Box::new(BinaryHeapQueue::new().with_window(options.window))
}

/// Registry of queue implementations, populated at startup.
#[derive(Clone)]
pub struct QueueRegistry {
    factories: BTreeMap<String, QueueFactory>,
}

impl QueueRegistry {
    /// Create a registry with no queue kinds.
    pub fn empty() -> Self {
        QueueRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// Create a registry holding the built-in queue kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(SEGMENTED_HEAP, segmented_heap);
        registry.register(BINARY_HEAP, binary_heap);
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: QueueFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the queue registered as `name`. An empty name selects
    /// [`DEFAULT_QUEUE`].
    pub fn create(&self, name: &str, options: &QueueOptions) -> Result<Box<dyn EventQueue>, SimError> {
        let name = if name.is_empty() { DEFAULT_QUEUE } else { name };
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SimError::UnknownQueue(name.to_string()))?;
        debug!(queue = name, window = options.window, "Creating event queue");
        Ok(factory(options))
    }
}

impl std::fmt::Debug for QueueRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
