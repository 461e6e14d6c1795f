//! Fixed-ceiling column storage backing one slice of the segmented heap.

use bigsim_common::{EntityId, Event, HandlerId, NodeRef, Payload, SimError, SimTime};

/// A growable block of heap slots stored as parallel columns.
///
/// Storage starts at `initial_capacity` and doubles on demand until it
/// reaches `max_len`. Positions are local to the segment.
#[derive(Debug)]
pub struct Segment {
    times: Vec<SimTime>,
    sources: Vec<Option<EntityId>>,
    targets: Vec<Option<NodeRef>>,
    handlers: Vec<HandlerId>,
    payloads: Vec<Payload>,
    capacity: usize,
    max_len: usize,
}

impl Segment {
    /// Create an empty segment.
    pub fn new(initial_capacity: usize, max_len: usize) -> Self {
        let max_len = max_len.max(1);
        let capacity = initial_capacity.clamp(1, max_len);
        Segment {
            times: Vec::with_capacity(capacity),
            sources: Vec::with_capacity(capacity),
            targets: Vec::with_capacity(capacity),
            handlers: Vec::with_capacity(capacity),
            payloads: Vec::with_capacity(capacity),
            capacity,
            max_len,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Whether the segment reached its maximum length.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_len
    }

    /// Slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Maximum number of slots.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Time stored at `pos`.
    pub fn key(&self, pos: usize) -> SimTime {
        self.times[pos]
    }

    /// A copy of the record at `pos`.
    pub fn entry(&self, pos: usize) -> Event {
        Event {
            time: self.times[pos],
            source: self.sources[pos],
            target: self.targets[pos].clone(),
            handler: self.handlers[pos],
            payload: self.payloads[pos].clone(),
        }
    }

    /// Move the record at `pos` out, leaving a vacant slot.
    pub fn take_entry(&mut self, pos: usize) -> Event {
        Event {
            time: self.times[pos],
            source: self.sources[pos].take(),
            target: self.targets[pos].take(),
            handler: self.handlers[pos],
            payload: std::mem::take(&mut self.payloads[pos]),
        }
    }

    /// Overwrite the record at `pos`.
    pub fn set_entry(&mut self, pos: usize, event: Event) {
        self.times[pos] = event.time;
        self.sources[pos] = event.source;
        self.targets[pos] = event.target;
        self.handlers[pos] = event.handler;
        self.payloads[pos] = event.payload;
    }

    /// Move the record at `src_pos` of another segment to `dst_pos`.
    pub fn copy_entry(&mut self, src: &mut Segment, src_pos: usize, dst_pos: usize) {
        let event = src.take_entry(src_pos);
        self.set_entry(dst_pos, event);
    }

    /// Move the record at `src_pos` to `dst_pos` within this segment.
    pub fn copy_within(&mut self, src_pos: usize, dst_pos: usize) {
        if src_pos == dst_pos {
            return;
        }
        let event = self.take_entry(src_pos);
        self.set_entry(dst_pos, event);
    }

    /// Append a record, doubling storage when the allocation is exhausted.
    pub fn push_last(&mut self, event: Event) -> Result<(), SimError> {
        let len = self.len();
        if len >= self.max_len {
            return Err(SimError::SegmentFull {
                capacity: self.max_len,
            });
        }
        if len == self.capacity {
            self.grow();
        }
        self.times.push(event.time);
        self.sources.push(event.source);
        self.targets.push(event.target);
        self.handlers.push(event.handler);
        self.payloads.push(event.payload);
        Ok(())
    }

    /// Remove the last record.
    pub fn remove_last(&mut self) -> Option<Event> {
        Some(Event {
            time: self.times.pop()?,
            source: self.sources.pop()?,
            target: self.targets.pop()?,
            handler: self.handlers.pop()?,
            payload: self.payloads.pop()?,
        })
    }

    fn grow(&mut self) {
        let new_capacity = self.capacity.saturating_mul(2).min(self.max_len);
        let additional = new_capacity - self.len();
        self.times.reserve_exact(additional);
        self.sources.reserve_exact(additional);
        self.targets.reserve_exact(additional);
        self.handlers.reserve_exact(additional);
        self.payloads.reserve_exact(additional);
        self.capacity = new_capacity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(t: i64) -> Event {
        Event::control(SimTime::from_ticks(t), HandlerId(t as u8))
    }

    #[test]
    fn test_growth_doubles_up_to_max() {
        let mut segment = Segment::new(2, 5);
        assert_eq!(segment.capacity(), 2);
        for t in 0..3 {
            segment.push_last(event(t)).unwrap();
        }
        assert_eq!(segment.capacity(), 4);
        segment.push_last(event(3)).unwrap();
        segment.push_last(event(4)).unwrap();
        assert_eq!(segment.capacity(), 5);
        assert!(segment.is_full());

        let err = segment.push_last(event(5)).unwrap_err();
        assert!(matches!(err, SimError::SegmentFull { capacity: 5 }));
        assert_eq!(segment.len(), 5);
    }

    #[test]
    fn test_initial_capacity_clamped_to_max() {
        let segment = Segment::new(1 << 16, 8);
        assert_eq!(segment.capacity(), 8);
    }

    #[test]
    fn test_remove_last_returns_whole_record() {
        let mut segment = Segment::new(4, 4);
        segment
            .push_last(Event {
                time: SimTime::from_ticks(9),
                source: Some(EntityId(3)),
                target: None,
                handler: HandlerId(2),
                payload: Payload::message(11u64),
            })
            .unwrap();

        let out = segment.remove_last().unwrap();
        assert_eq!(out.time, SimTime::from_ticks(9));
        assert_eq!(out.source, Some(EntityId(3)));
        assert_eq!(out.handler, HandlerId(2));
        assert_eq!(out.payload.downcast_ref::<u64>(), Some(&11));
        assert!(segment.is_empty());
        assert!(segment.remove_last().is_none());
    }

    #[test]
    fn test_copy_moves_all_fields() {
        let mut a = Segment::new(4, 4);
        let mut b = Segment::new(4, 4);
        a.push_last(Event {
            time: SimTime::from_ticks(1),
            source: Some(EntityId(5)),
            target: None,
            handler: HandlerId(7),
            payload: Payload::message("x"),
        })
        .unwrap();
        b.push_last(event(40)).unwrap();
        b.push_last(event(50)).unwrap();

        b.copy_entry(&mut a, 0, 1);
        assert_eq!(b.key(1), SimTime::from_ticks(1));
        assert_eq!(b.entry(1).source, Some(EntityId(5)));
        assert_eq!(b.entry(1).handler, HandlerId(7));
        assert!(a.entry(0).source.is_none());

        b.copy_within(1, 0);
        assert_eq!(b.key(0), SimTime::from_ticks(1));
        assert_eq!(b.entry(0).payload.downcast_ref::<&str>(), Some(&"x"));
    }
}
