//! # bigsim-common
//!
//! Common types and traits for the BigSim simulation core.
//!
//! This crate provides core simulation primitives including:
//! - Time representation ([`SimTime`])
//! - Entity and handler identification ([`EntityId`], [`HandlerId`])
//! - Event records ([`Event`], [`Payload`], [`EventBatch`])
//! - The event queue contract ([`EventQueue`], [`SharedQueue`])
//! - Simulation context passed to handlers and controls ([`SimContext`])
//! - Collaborator traits ([`Node`], [`Handler`], [`Schedule`], [`Control`])

pub mod queue;
pub mod schedule;

pub use queue::{EventBatch, EventQueue, SharedQueue};
pub use schedule::{PeriodicSchedule, Schedule};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// The event queue reached its maximum capacity.
    #[error("Event queue is full ({capacity} events)")]
    QueueFull {
        /// Maximum number of events the queue can hold.
        capacity: u64,
    },

    /// A segment was asked to grow past its maximum size.
    #[error("Segment is full ({capacity} entries)")]
    SegmentFull {
        /// Maximum number of entries in one segment.
        capacity: usize,
    },

    /// Simulation time overflow.
    #[error("Simulation time overflow")]
    TimeOverflow,

    /// An event was scheduled before the current time.
    #[error("Cannot schedule event at {requested} when current time is {now}")]
    NonCausalEvent {
        /// Requested event time.
        requested: SimTime,
        /// Current simulation time.
        now: SimTime,
    },

    /// No queue implementation is registered under the given name.
    #[error("Unknown event queue implementation: {0}")]
    UnknownQueue(String),

    /// The target entity has no handler with the given id.
    #[error("Handler {handler} not found on entity {entity:?}")]
    HandlerNotFound {
        /// Entity that was targeted.
        entity: EntityId,
        /// Handler that was requested.
        handler: HandlerId,
    },

    /// A control event referenced an unregistered control.
    #[error("Control not found: {0}")]
    ControlNotFound(HandlerId),

    /// Event handler error.
    #[error("Event handler error in entity {entity:?}: {message}")]
    HandlerError {
        /// Entity that had the error.
        entity: EntityId,
        /// Error message.
        message: String,
    },

    /// Event handler panicked.
    #[error("Event handler panicked in entity {entity:?}: {message}")]
    HandlerPanicked {
        /// Entity whose handler panicked.
        entity: EntityId,
        /// Panic message, if it was a string.
        message: String,
    },

    /// A dispatched task went away without reporting an outcome.
    #[error("Task for entity {0:?} terminated without reporting a result")]
    TaskLost(EntityId),

    /// One or more dispatched entity tasks failed; the run was aborted.
    #[error("Execution of simulated task failed for entity {entity:?} at {time} ({failures} failed task(s)): {cause}")]
    TaskFailed {
        /// Entity of the first failed task.
        entity: EntityId,
        /// Time of the event that failed.
        time: SimTime,
        /// Total number of failed tasks observed while draining.
        failures: usize,
        /// The first failure.
        #[source]
        cause: Box<SimError>,
    },

    /// The worker pool could not be created.
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in logical ticks.
///
/// Ticks are unrelated to wall-clock time. [`SimTime::MAX`] doubles as the
/// "no pending event" answer of [`EventQueue::next_time`], so it composes with
/// `min` comparisons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(i64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// The largest representable time.
    pub const MAX: SimTime = SimTime(i64::MAX);

    /// Create from raw ticks.
    pub const fn from_ticks(ticks: i64) -> Self {
        SimTime(ticks)
    }

    /// Get the raw tick value.
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Add a delay, returning `None` on overflow.
    pub fn checked_add(self, delay: i64) -> Option<SimTime> {
        self.0.checked_add(delay).map(SimTime)
    }

    /// Time `delay` ticks after `self`.
    pub fn after(self, delay: i64) -> Result<SimTime, SimError> {
        self.checked_add(delay).ok_or(SimError::TimeOverflow)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={}", self.0)
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an entity in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

/// Selects a handler on a node, or a registered control for control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandlerId(pub u8);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Opaque message data carried by a message event.
pub type Message = Arc<dyn Any + Send + Sync>;

/// A periodic tick for a handler driven by a [`Schedule`].
#[derive(Clone)]
pub struct CycleTick {
    /// Identifies the schedule to the handler's cycle counter.
    pub schedule_id: u32,
    /// The schedule that computes the fallback delay.
    pub schedule: Arc<dyn Schedule>,
}

impl std::fmt::Debug for CycleTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleTick")
            .field("schedule_id", &self.schedule_id)
            .finish_non_exhaustive()
    }
}

/// Event payload variants.
#[derive(Clone, Default)]
pub enum Payload {
    /// No data. Used by control events.
    #[default]
    Empty,
    /// A self-rescheduling periodic tick.
    Cycle(CycleTick),
    /// A message delivered to the target handler.
    Message(Message),
}

impl Payload {
    /// Wrap a value as a message payload.
    pub fn message<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Message(Arc::new(value))
    }

    /// Create a cycle payload for the given schedule.
    pub fn cycle(schedule_id: u32, schedule: Arc<dyn Schedule>) -> Self {
        Payload::Cycle(CycleTick {
            schedule_id,
            schedule,
        })
    }

    /// Borrow the message as `T`, if this is a message of that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Message(message) => (**message).downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Whether this payload denotes a periodic tick.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Payload::Cycle(_))
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Empty => write!(f, "Empty"),
            Payload::Cycle(tick) => write!(f, "Cycle({})", tick.schedule_id),
            Payload::Message(_) => write!(f, "Message(..)"),
        }
    }
}

/// A simulation event.
///
/// An event without a target is a control event: it is global and its
/// `handler` selects a registered [`Control`] rather than a node handler.
#[derive(Debug, Clone)]
pub struct Event {
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event, if any.
    pub source: Option<EntityId>,
    /// Node the event is delivered to. `None` marks a control event.
    pub target: Option<NodeRef>,
    /// Handler on the target node, or control index.
    pub handler: HandlerId,
    /// Event payload.
    pub payload: Payload,
}

impl Event {
    /// Create a control event.
    pub fn control(time: SimTime, control: HandlerId) -> Self {
        Event {
            time,
            source: None,
            target: None,
            handler: control,
            payload: Payload::Empty,
        }
    }

    /// Create an event delivered to a node handler.
    pub fn to_node(
        time: SimTime,
        source: Option<EntityId>,
        target: NodeRef,
        handler: HandlerId,
        payload: Payload,
    ) -> Self {
        Event {
            time,
            source,
            target: Some(target),
            handler,
            payload,
        }
    }

    /// Whether this is a control event.
    pub fn is_control(&self) -> bool {
        self.target.is_none()
    }

    /// ID of the target entity, if any.
    pub fn target_id(&self) -> Option<EntityId> {
        self.target.as_ref().map(NodeRef::id)
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// A simulated entity.
///
/// Node state is not synchronized internally: the engine guarantees that at
/// most one task runs against a node at any instant.
pub trait Node: Send {
    /// Whether the node currently accepts events.
    fn is_live(&self) -> bool {
        true
    }

    /// The handler registered under `handler`, if any.
    fn handler_mut(&mut self, handler: HandlerId) -> Option<&mut dyn Handler>;
}

/// A protocol running on a node.
pub trait Handler: Send {
    /// Handle a message event.
    fn process_event(
        &mut self,
        ctx: &mut SimContext,
        source: Option<EntityId>,
        payload: &Payload,
    ) -> Result<(), SimError>;

    /// Run one cycle of the activity driven by the given schedule.
    fn advance_cycle(&mut self, _ctx: &mut SimContext, _schedule_id: u32) -> Result<(), SimError> {
        Ok(())
    }

    /// Delay until the next cycle chosen by the handler itself.
    ///
    /// Zero defers to the schedule's own delay.
    fn next_intrinsic_delay(&self) -> i64 {
        0
    }
}

/// A global, entity-less action run by control events.
pub trait Control: Send {
    /// Run the control. Returning `true` requests engine shutdown.
    fn execute(&mut self, ctx: &mut SimContext) -> Result<bool, SimError>;
}

// ============================================================================
// Node References
// ============================================================================

/// Shared handle to a node, compared and hashed by [`EntityId`].
#[derive(Clone)]
pub struct NodeRef {
    id: EntityId,
    cell: Arc<Mutex<Box<dyn Node>>>,
}

impl NodeRef {
    /// Wrap a node under the given ID.
    pub fn new<N: Node + 'static>(id: EntityId, node: N) -> Self {
        Self::from_box(id, Box::new(node))
    }

    /// Wrap a boxed node under the given ID.
    pub fn from_box(id: EntityId, node: Box<dyn Node>) -> Self {
        NodeRef {
            id,
            cell: Arc::new(Mutex::new(node)),
        }
    }

    /// Get the entity ID.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Whether the node currently accepts events.
    pub fn is_live(&self) -> bool {
        self.cell.lock().is_live()
    }

    /// Lock the node for exclusive access.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Node>> {
        self.cell.lock()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

impl std::hash::Hash for NodeRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeRef({})", self.id.0)
    }
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to handlers and controls during execution.
///
/// Carries the logical clock explicitly and gives access to the shared queue
/// for protocol-originated events.
pub struct SimContext {
    now: SimTime,
    queue: SharedQueue,
    node: Option<NodeRef>,
    scheduled: u64,
}

impl SimContext {
    /// Create a context for a control or test.
    pub fn new(now: SimTime, queue: SharedQueue) -> Self {
        SimContext {
            now,
            queue,
            node: None,
            scheduled: 0,
        }
    }

    /// Create a context for an event executing on `node`.
    pub fn for_node(now: SimTime, queue: SharedQueue, node: NodeRef) -> Self {
        SimContext {
            now,
            queue,
            node: Some(node),
            scheduled: 0,
        }
    }

    /// Get the current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// The node the current event is executing on.
    ///
    /// The node is locked while its handler runs; locking it again from the
    /// handler deadlocks.
    pub fn node(&self) -> Option<&NodeRef> {
        self.node.as_ref()
    }

    /// The shared event queue.
    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// Number of events inserted through this context.
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }

    /// Insert an event at an absolute time.
    ///
    /// The source defaults to the executing node when the event has none.
    pub fn schedule_at(&mut self, mut event: Event) -> Result<(), SimError> {
        if event.time < self.now {
            return Err(SimError::NonCausalEvent {
                requested: event.time,
                now: self.now,
            });
        }
        if event.source.is_none() {
            event.source = self.node.as_ref().map(NodeRef::id);
        }
        self.queue.add(event)?;
        self.scheduled += 1;
        Ok(())
    }

    /// Insert an event `delay` ticks from now.
    ///
    /// A `None` target schedules the control registered under `handler`.
    pub fn schedule_in(
        &mut self,
        delay: i64,
        target: Option<NodeRef>,
        handler: HandlerId,
        payload: Payload,
    ) -> Result<(), SimError> {
        let time = self.now.after(delay)?;
        self.schedule_at(Event {
            time,
            source: None,
            target,
            handler,
            payload,
        })
    }

    /// Send a message to `target` after `delay` ticks.
    pub fn send(
        &mut self,
        delay: i64,
        target: &NodeRef,
        handler: HandlerId,
        payload: Payload,
    ) -> Result<(), SimError> {
        self.schedule_in(delay, Some(target.clone()), handler, payload)
    }
}
