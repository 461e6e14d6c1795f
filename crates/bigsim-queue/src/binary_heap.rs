//! Single-allocation event queue on top of `std::collections::BinaryHeap`.

use crate::heap::DEFAULT_WINDOW;
use bigsim_common::{Event, EventBatch, EventQueue, SimError, SimTime};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Registry name of [`BinaryHeapQueue`].
pub const BINARY_HEAP: &str = "binary-heap";

/// Heap entry ordered by time, then insertion sequence.
struct QueuedEvent {
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.time == other.event.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest time first)
        other
            .event
            .time
            .cmp(&self.event.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// An event queue backed by one contiguous binary heap.
///
/// Events with equal times are returned in insertion order.
pub struct BinaryHeapQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
    window: i64,
}

impl BinaryHeapQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        BinaryHeapQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
            window: DEFAULT_WINDOW,
        }
    }

    /// Set the similarity window used by [`EventQueue::remove_many`].
    pub fn with_window(mut self, window: i64) -> Self {
        self.window = window.max(0);
        self
    }
}

impl Default for BinaryHeapQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BinaryHeapQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryHeapQueue")
            .field("len", &self.heap.len())
            .field("window", &self.window)
            .finish()
    }
}

impl EventQueue for BinaryHeapQueue {
    fn add(&mut self, event: Event) -> Result<(), SimError> {
        if self.is_full() {
            return Err(SimError::QueueFull {
                capacity: usize::MAX as u64,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEvent { seq, event });
        Ok(())
    }

    fn remove_first(&mut self) -> Option<Event> {
        self.heap.pop().map(|queued| queued.event)
    }

    fn remove_many(&mut self, max_batch: usize, batch: &mut EventBatch) {
        batch.clear();
        let Some(first) = self.remove_first() else {
            return;
        };
        let limit = first.time.checked_add(self.window).unwrap_or(SimTime::MAX);
        batch.push(first);
        while batch.len() < max_batch {
            match self.heap.peek() {
                Some(head) if head.event.time <= limit => {}
                _ => break,
            }
            match self.remove_first() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
    }

    fn len(&self) -> u64 {
        self.heap.len() as u64
    }

    fn is_full(&self) -> bool {
        self.heap.len() == usize::MAX
    }

    fn next_time(&self) -> SimTime {
        self.heap
            .peek()
            .map(|queued| queued.event.time)
            .unwrap_or(SimTime::MAX)
    }

    fn kind(&self) -> &'static str {
        BINARY_HEAP
    }
}
