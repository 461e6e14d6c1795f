//! # bigsim-queue
//!
//! Event queue implementations for BigSim.
//!
//! - [`SegmentedHeap`]: a binary min-heap split across fixed-ceiling
//!   [`Segment`]s, able to hold up to 2^60 events
//! - [`BinaryHeapQueue`]: a contiguous heap with FIFO ordering among equal times
//! - [`QueueRegistry`]: selects an implementation by configured name
//!
//! Both queues implement [`bigsim_common::EventQueue`], including batch
//! removal within a similarity window.

pub mod binary_heap;
pub mod heap;
pub mod registry;
pub mod segment;

pub use binary_heap::{BinaryHeapQueue, BINARY_HEAP};
pub use heap::{HeapLayout, SegmentedHeap, DEFAULT_WINDOW, SEGMENTED_HEAP};
pub use registry::{QueueFactory, QueueOptions, QueueRegistry, DEFAULT_QUEUE};
pub use segment::Segment;
