//! Two-level binary min-heap spanning a list of segments.
//!
//! The heap is a single logical 0-indexed binary heap. Global index `g` lives
//! in segment `g / segment_max` at offset `g % segment_max`, so the queue can
//! hold far more events than one contiguous allocation allows. Only the
//! trailing segment is ever partially filled.

use crate::segment::Segment;
use bigsim_common::{Event, EventBatch, EventQueue, SimError, SimTime};
use tracing::debug;

/// Default similarity window for batch removal, in ticks.
pub const DEFAULT_WINDOW: i64 = 50;

/// Registry name of [`SegmentedHeap`].
pub const SEGMENTED_HEAP: &str = "segmented-heap";

/// Geometry of a [`SegmentedHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    /// Slots allocated when a segment is created.
    pub initial_capacity: usize,
    /// Slots per full segment.
    pub segment_max: usize,
    /// Maximum number of segments.
    pub segment_count_max: usize,
}

impl HeapLayout {
    /// Production initial segment allocation (2^16).
    pub const INITIAL_CAPACITY: usize = 1 << 16;
    /// Production segment size (2^30).
    pub const SEGMENT_MAX: usize = 1 << 30;
    /// Production segment count ceiling (2^30).
    pub const SEGMENT_COUNT_MAX: usize = 1 << 30;

    /// Create a layout. Zero values are raised to one.
    pub fn new(initial_capacity: usize, segment_max: usize, segment_count_max: usize) -> Self {
        let segment_max = segment_max.max(1);
        HeapLayout {
            initial_capacity: initial_capacity.clamp(1, segment_max),
            segment_max,
            segment_count_max: segment_count_max.max(1),
        }
    }

    /// Theoretical maximum number of events.
    pub fn capacity(&self) -> u64 {
        (self.segment_max as u64).saturating_mul(self.segment_count_max as u64)
    }
}

impl Default for HeapLayout {
    fn default() -> Self {
        HeapLayout {
            initial_capacity: Self::INITIAL_CAPACITY,
            segment_max: Self::SEGMENT_MAX,
            segment_count_max: Self::SEGMENT_COUNT_MAX,
        }
    }
}

/// A min-heap of events ordered by time, stored across [`Segment`]s.
///
/// Events with equal times come out in whatever order percolation leaves
/// them; there is no secondary key.
#[derive(Debug)]
pub struct SegmentedHeap {
    segments: Vec<Segment>,
    size: u64,
    layout: HeapLayout,
    window: i64,
}

impl SegmentedHeap {
    /// Create an empty heap with the production layout.
    pub fn new() -> Self {
        Self::with_layout(HeapLayout::default())
    }

    /// Create an empty heap with the given layout.
    pub fn with_layout(layout: HeapLayout) -> Self {
        SegmentedHeap {
            segments: Vec::new(),
            size: 0,
            layout: HeapLayout::new(
                layout.initial_capacity,
                layout.segment_max,
                layout.segment_count_max,
            ),
            window: DEFAULT_WINDOW,
        }
    }

    /// Set the similarity window used by [`EventQueue::remove_many`].
    pub fn with_window(mut self, window: i64) -> Self {
        self.window = window.max(0);
        self
    }

    /// The heap geometry.
    pub fn layout(&self) -> HeapLayout {
        self.layout
    }

    /// Theoretical maximum number of events.
    pub fn capacity(&self) -> u64 {
        self.layout.capacity()
    }

    /// Number of allocated segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn locate(&self, index: u64) -> (usize, usize) {
        let segment_max = self.layout.segment_max as u64;
        ((index / segment_max) as usize, (index % segment_max) as usize)
    }

    fn key(&self, index: u64) -> SimTime {
        let (segment, offset) = self.locate(index);
        self.segments[segment].key(offset)
    }

    fn take(&mut self, index: u64) -> Event {
        let (segment, offset) = self.locate(index);
        self.segments[segment].take_entry(offset)
    }

    fn put(&mut self, index: u64, event: Event) {
        let (segment, offset) = self.locate(index);
        self.segments[segment].set_entry(offset, event);
    }

    /// Move the record at global index `from` to global index `to`.
    fn shift(&mut self, from: u64, to: u64) {
        let (src, src_pos) = self.locate(from);
        let (dst, dst_pos) = self.locate(to);
        if src == dst {
            self.segments[src].copy_within(src_pos, dst_pos);
        } else if src < dst {
            let (low, high) = self.segments.split_at_mut(dst);
            high[0].copy_entry(&mut low[src], src_pos, dst_pos);
        } else {
            let (low, high) = self.segments.split_at_mut(src);
            low[dst].copy_entry(&mut high[0], src_pos, dst_pos);
        }
    }

    fn percolate_up(&mut self, mut index: u64) {
        let moving = self.take(index);
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.key(parent) <= moving.time {
                break;
            }
            self.shift(parent, index);
            index = parent;
        }
        self.put(index, moving);
    }

    fn percolate_down(&mut self, moving: Event) {
        let mut index = 0u64;
        loop {
            let left = 2 * index + 1;
            if left >= self.size {
                break;
            }
            let right = left + 1;
            let child = if right < self.size && self.key(right) < self.key(left) {
                right
            } else {
                left
            };
            if self.key(child) >= moving.time {
                break;
            }
            self.shift(child, index);
            index = child;
        }
        self.put(index, moving);
    }

    fn pop_last(&mut self) -> Option<Event> {
        let segment = self.segments.last_mut()?;
        let event = segment.remove_last()?;
        if segment.is_empty() {
            self.segments.pop();
            debug!(segments = self.segments.len(), "Dropped trailing heap segment");
        }
        self.size -= 1;
        Some(event)
    }
}

impl Default for SegmentedHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for SegmentedHeap {
    fn add(&mut self, event: Event) -> Result<(), SimError> {
        if self.size >= self.capacity() {
            return Err(SimError::QueueFull {
                capacity: self.capacity(),
            });
        }
        let index = self.size;
        let (segment, _) = self.locate(index);
        if segment == self.segments.len() {
            self.segments.push(Segment::new(
                self.layout.initial_capacity,
                self.layout.segment_max,
            ));
            debug!(segments = self.segments.len(), "Appended heap segment");
        }
        self.segments[segment].push_last(event)?;
        self.size += 1;
        self.percolate_up(index);
        Ok(())
    }

    fn remove_first(&mut self) -> Option<Event> {
        let last = self.pop_last()?;
        if self.size == 0 {
            return Some(last);
        }
        let first = self.take(0);
        self.percolate_down(last);
        Some(first)
    }

    fn remove_many(&mut self, max_batch: usize, batch: &mut EventBatch) {
        batch.clear();
        let Some(first) = self.remove_first() else {
            return;
        };
        let limit = first.time.checked_add(self.window).unwrap_or(SimTime::MAX);
        batch.push(first);
        while batch.len() < max_batch && self.size > 0 && self.key(0) <= limit {
            match self.remove_first() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn is_full(&self) -> bool {
        self.size >= self.capacity()
    }

    fn next_time(&self) -> SimTime {
        if self.size == 0 {
            SimTime::MAX
        } else {
            self.key(0)
        }
    }

    fn kind(&self) -> &'static str {
        SEGMENTED_HEAP
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigsim_common::{EntityId, HandlerId, Payload};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn event(t: i64) -> Event {
        Event::control(SimTime::from_ticks(t), HandlerId(0))
    }

    fn tiny() -> SegmentedHeap {
        SegmentedHeap::with_layout(HeapLayout::new(2, 4, 3))
    }

    fn drain_times(heap: &mut SegmentedHeap) -> Vec<i64> {
        std::iter::from_fn(|| heap.remove_first())
            .map(|e| e.time.ticks())
            .collect()
    }

    #[test]
    fn test_empty_heap() {
        let mut heap = SegmentedHeap::new();
        assert!(heap.is_empty());
        assert_eq!(heap.next_time(), SimTime::MAX);
        assert!(heap.remove_first().is_none());
        assert_eq!(heap.segment_count(), 0);
        assert_eq!(heap.capacity(), 1u64 << 60);

        let mut batch = EventBatch::default();
        heap.remove_many(10, &mut batch);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_pops_in_time_order() {
        let mut heap = tiny();
        for t in [7, 3, 9, 1, 4, 4, 8, 0, 2] {
            heap.add(event(t)).unwrap();
        }
        assert_eq!(heap.next_time(), SimTime::from_ticks(0));
        assert_eq!(drain_times(&mut heap), vec![0, 1, 2, 3, 4, 4, 7, 8, 9]);
    }

    #[test]
    fn test_random_order_and_conservation() {
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        let mut heap = SegmentedHeap::with_layout(HeapLayout::new(4, 64, 64));
        let mut expected = Vec::new();

        for round in 0..20 {
            for _ in 0..150 {
                let t = rng.gen_range(0..1_000);
                heap.add(event(t)).unwrap();
                expected.push(t);
            }
            // Interleave removals so percolation crosses segment boundaries both ways.
            for _ in 0..(round * 5) {
                let popped = heap.remove_first().unwrap().time.ticks();
                let min = *expected.iter().min().unwrap();
                assert_eq!(popped, min);
                let pos = expected.iter().position(|&t| t == min).unwrap();
                expected.swap_remove(pos);
            }
            assert_eq!(heap.len(), expected.len() as u64);
        }

        expected.sort_unstable();
        assert_eq!(drain_times(&mut heap), expected);
        assert_eq!(heap.segment_count(), 0);
    }

    #[test]
    fn test_fields_survive_percolation() {
        let mut heap = tiny();
        for i in (0..10u64).rev() {
            heap.add(Event {
                time: SimTime::from_ticks(i as i64),
                source: Some(EntityId(i)),
                target: None,
                handler: HandlerId(i as u8),
                payload: Payload::message(i * 100),
            })
            .unwrap();
        }
        for i in 0..10u64 {
            let e = heap.remove_first().unwrap();
            assert_eq!(e.source, Some(EntityId(i)));
            assert_eq!(e.handler, HandlerId(i as u8));
            assert_eq!(e.payload.downcast_ref::<u64>(), Some(&(i * 100)));
        }
    }

    #[test]
    fn test_segments_follow_size() {
        let mut heap = tiny();
        assert_eq!(heap.segment_count(), 0);
        for t in 0..4 {
            heap.add(event(t)).unwrap();
        }
        assert_eq!(heap.segment_count(), 1);
        heap.add(event(4)).unwrap();
        assert_eq!(heap.segment_count(), 2);

        heap.remove_first().unwrap();
        assert_eq!(heap.segment_count(), 1);
        assert_eq!(heap.len(), 4);
    }

    #[test]
    fn test_capacity_boundary() {
        let mut heap = tiny();
        assert_eq!(heap.capacity(), 12);
        for t in 0..12 {
            heap.add(event(12 - t)).unwrap();
        }
        assert!(heap.is_full());
        assert_eq!(heap.segment_count(), 3);

        let err = heap.add(event(0)).unwrap_err();
        assert!(matches!(err, SimError::QueueFull { capacity: 12 }));
        assert_eq!(heap.len(), 12);

        assert_eq!(heap.remove_first().unwrap().time.ticks(), 1);
        assert!(!heap.is_full());
        heap.add(event(0)).unwrap();
        assert_eq!(heap.next_time(), SimTime::from_ticks(0));
    }

    #[test]
    fn test_remove_many_window() {
        let mut heap = SegmentedHeap::new();
        for t in [10, 10, 15, 100] {
            heap.add(event(t)).unwrap();
        }
        let mut batch = EventBatch::with_capacity(8);
        heap.remove_many(8, &mut batch);
        let times: Vec<i64> = batch.iter().map(|e| e.time.ticks()).collect();
        assert_eq!(times, vec![10, 10, 15]);
        assert_eq!(heap.len(), 1);

        heap.remove_many(8, &mut batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.as_slice()[0].time.ticks(), 100);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_remove_many_respects_max_batch() {
        let mut heap = tiny();
        for _ in 0..6 {
            heap.add(event(5)).unwrap();
        }
        let mut batch = EventBatch::default();
        heap.remove_many(4, &mut batch);
        assert_eq!(batch.len(), 4);
        heap.remove_many(0, &mut batch);
        assert_eq!(batch.len(), 1);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_remove_many_window_bound() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut heap = SegmentedHeap::with_layout(HeapLayout::new(8, 32, 16)).with_window(20);
        for _ in 0..400 {
            heap.add(event(rng.gen_range(0..2_000))).unwrap();
        }
        let mut batch = EventBatch::default();
        let mut previous_last = i64::MIN;
        while !heap.is_empty() {
            heap.remove_many(16, &mut batch);
            let first = batch.as_slice()[0].time.ticks();
            assert!(first >= previous_last);
            for e in &batch {
                assert!(e.time.ticks() - first <= 20);
            }
            previous_last = batch.as_slice()[batch.len() - 1].time.ticks();
        }
    }
}
