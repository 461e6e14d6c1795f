//! The event queue contract shared by every queue implementation.

use crate::{Event, SimError, SimTime};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// A time-ordered queue of simulation events.
///
/// Implementations are selected by name at startup (see the queue registry
/// in `bigsim-queue`); the engine only depends on this trait.
pub trait EventQueue: Send {
    /// Insert an event. Fails with [`SimError::QueueFull`] at capacity.
    fn add(&mut self, event: Event) -> Result<(), SimError>;

    /// Remove and return an event with the minimum time.
    fn remove_first(&mut self) -> Option<Event>;

    /// Refill `batch` with up to `max_batch` events from the front of the
    /// queue whose times lie within the queue's similarity window of the
    /// first one removed. Leaves `batch` empty only when the queue is empty.
    fn remove_many(&mut self, max_batch: usize, batch: &mut EventBatch);

    /// Number of queued events.
    fn len(&self) -> u64;

    /// Whether the queue holds no events.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue cannot hold another event.
    fn is_full(&self) -> bool;

    /// Minimum queued time, or [`SimTime::MAX`] when empty.
    fn next_time(&self) -> SimTime;

    /// Registry name of the implementation.
    fn kind(&self) -> &'static str;
}

// ============================================================================
// Event Batch
// ============================================================================

/// A reusable, ordered batch of events returned by [`EventQueue::remove_many`].
///
/// The backing storage belongs to the caller and is cleared and refilled on
/// every call, so its allocation is reused across batches.
#[derive(Debug, Default)]
pub struct EventBatch {
    events: Vec<Event>,
}

impl EventBatch {
    /// Create a batch able to hold `capacity` events without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        EventBatch {
            events: Vec::with_capacity(capacity),
        }
    }

    /// Drop all events, keeping the allocation.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Append an event.
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Number of events in the batch.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The events in pop order.
    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    /// Iterate the events in pop order.
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Move the events out in pop order, keeping the allocation.
    pub fn drain(&mut self) -> std::vec::Drain<'_, Event> {
        self.events.drain(..)
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

// ============================================================================
// Shared Queue
// ============================================================================

/// An event queue behind a single exclusion lock.
///
/// Cloning yields another handle to the same queue. Every operation takes the
/// lock for its full duration, including batch removal.
#[derive(Clone)]
pub struct SharedQueue {
    inner: Arc<Mutex<Box<dyn EventQueue>>>,
}

impl SharedQueue {
    /// Share a queue.
    pub fn new(queue: Box<dyn EventQueue>) -> Self {
        SharedQueue {
            inner: Arc::new(Mutex::new(queue)),
        }
    }

    /// Insert an event.
    pub fn add(&self, event: Event) -> Result<(), SimError> {
        self.inner.lock().add(event)
    }

    /// Remove an event with the minimum time.
    pub fn remove_first(&self) -> Option<Event> {
        self.inner.lock().remove_first()
    }

    /// Refill `batch` from the front of the queue.
    pub fn remove_many(&self, max_batch: usize, batch: &mut EventBatch) {
        self.inner.lock().remove_many(max_batch, batch)
    }

    /// Number of queued events.
    pub fn len(&self) -> u64 {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Minimum queued time, or [`SimTime::MAX`] when empty.
    pub fn next_time(&self) -> SimTime {
        self.inner.lock().next_time()
    }

    /// Registry name of the underlying implementation.
    pub fn kind(&self) -> &'static str {
        self.inner.lock().kind()
    }

    /// Lock the queue for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn EventQueue>> {
        self.inner.lock()
    }
}

impl std::fmt::Debug for SharedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queue = self.inner.lock();
        f.debug_struct("SharedQueue")
            .field("kind", &queue.kind())
            .field("len", &queue.len())
            .finish()
    }
}
