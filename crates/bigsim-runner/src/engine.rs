//! Parallel scheduling engine.
//!
//! The engine drains the shared queue in batches of near-simultaneous events.
//! Entity events of a batch run on a worker pool, at most one task per entity
//! at a time; control events of the batch are held back and run serially on
//! the driving thread once every task of the batch has completed. A batch of
//! a single event runs directly on the driving thread.
//!
//! Global time order is approximate: events of one batch may run concurrently
//! even though their times differ by up to the queue's similarity window.
//! Events targeting the same entity always run in pop order.

use crate::config::EngineConfig;
use crate::{RunSummary, RunnerError, StopReason};
use bigsim_common::{
    Control, EntityId, Event, EventBatch, HandlerId, NodeRef, Payload, Schedule, SharedQueue,
    SimContext, SimError, SimTime,
};
use bigsim_queue::{QueueOptions, QueueRegistry};
use crossbeam_channel::{bounded, Receiver};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Completion handle of a dispatched entity task.
struct TaskHandle {
    time: SimTime,
    done: Receiver<Result<(), SimError>>,
}

impl TaskHandle {
    fn join(self, entity: EntityId) -> Result<(), SimError> {
        self.done.recv().unwrap_or(Err(SimError::TaskLost(entity)))
    }
}

/// A control and the schedule that re-arms it.
struct RegisteredControl {
    control: Box<dyn Control>,
    schedule: Arc<dyn Schedule>,
}

/// First failure seen while a batch was in flight.
struct Failure {
    entity: EntityId,
    time: SimTime,
    cause: SimError,
    count: usize,
}

impl Failure {
    fn into_error(self) -> SimError {
        SimError::TaskFailed {
            entity: self.entity,
            time: self.time,
            failures: self.count,
            cause: Box::new(self.cause),
        }
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Default)]
struct RunCounters {
    events_processed: u64,
    batches: u64,
    largest_batch: usize,
    final_time: SimTime,
}

/// Executes one entity event against its target.
///
/// Shared by the single-event path and worker tasks. Locks the target node
/// for the duration of the handler call.
fn execute_entity_event(queue: &SharedQueue, target: &NodeRef, event: Event) -> Result<(), SimError> {
    let entity = target.id();
    let mut node = target.lock();
    let handler = node
        .handler_mut(event.handler)
        .ok_or(SimError::HandlerNotFound {
            entity,
            handler: event.handler,
        })?;
    let mut ctx = SimContext::for_node(event.time, queue.clone(), target.clone());

    match &event.payload {
        Payload::Cycle(tick) => {
            handler.advance_cycle(&mut ctx, tick.schedule_id)?;
            let mut delay = handler.next_intrinsic_delay();
            if delay == 0 {
                delay = tick.schedule.next_delay(event.time);
            }
            if delay > 0 {
                let time = event.time.after(delay)?;
                queue.add(Event {
                    time,
                    source: event.source,
                    target: Some(target.clone()),
                    handler: event.handler,
                    payload: event.payload.clone(),
                })?;
            }
        }
        payload => handler.process_event(&mut ctx, event.source, payload)?,
    }
    Ok(())
}

/// Like [`execute_entity_event`], reporting a handler panic as an error.
fn execute_guarded(queue: &SharedQueue, target: &NodeRef, event: Event) -> Result<(), SimError> {
    let entity = target.id();
    catch_unwind(AssertUnwindSafe(|| execute_entity_event(queue, target, event))).unwrap_or_else(
        |panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SimError::HandlerPanicked { entity, message })
        },
    )
}

/// The scheduling engine.
pub struct Engine {
    config: EngineConfig,
    queue: SharedQueue,
    pool: rayon::ThreadPool,
    controls: Vec<RegisteredControl>,
    pending_tasks: HashMap<EntityId, TaskHandle>,
    pending_controls: Vec<Event>,
    batch: EventBatch,
    next_log: SimTime,
    counters: RunCounters,
    failure: Option<Failure>,
}

impl Engine {
    /// Create an engine with the built-in queue kinds.
    pub fn new(config: EngineConfig) -> Result<Self, RunnerError> {
        Self::with_registry(config, &QueueRegistry::default())
    }

    /// Create an engine, resolving the configured queue in `registry`.
    pub fn with_registry(config: EngineConfig, registry: &QueueRegistry) -> Result<Self, RunnerError> {
        config.validate()?;
        let options = QueueOptions {
            window: config.window,
            ..QueueOptions::default()
        };
        let queue = SharedQueue::new(registry.create(&config.queue, &options)?);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("bigsim-worker-{}", i))
            .build()
            .map_err(|e| SimError::WorkerPool(e.to_string()))?;

        info!(
            queue = queue.kind(),
            workers = pool.current_num_threads(),
            end_time = config.end_time.ticks(),
            "Engine created"
        );

        Ok(Engine {
            batch: EventBatch::with_capacity(config.batch_capacity),
            next_log: SimTime::ZERO,
            config,
            queue,
            pool,
            controls: Vec::new(),
            pending_tasks: HashMap::new(),
            pending_controls: Vec::new(),
            counters: RunCounters::default(),
            failure: None,
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared event queue.
    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// Register a control.
    ///
    /// `first_run` schedules its first execution; `None` leaves it to the
    /// post-simulation pass (if the schedule asks for one) or to events
    /// scheduled explicitly under the returned id.
    pub fn add_control(
        &mut self,
        control: Box<dyn Control>,
        schedule: Arc<dyn Schedule>,
        first_run: Option<SimTime>,
    ) -> Result<HandlerId, RunnerError> {
        let index = u8::try_from(self.controls.len()).map_err(|_| {
            RunnerError::ConfigError(format!("at most {} controls are supported", u8::MAX as usize + 1))
        })?;
        let id = HandlerId(index);
        self.controls.push(RegisteredControl { control, schedule });
        if let Some(time) = first_run {
            self.queue.add(Event::control(time, id))?;
        }
        Ok(id)
    }

    /// Insert an initial event.
    pub fn schedule(&self, event: Event) -> Result<(), SimError> {
        self.queue.add(event)
    }

    /// Start a cyclic activity on `node` at time `first`.
    pub fn schedule_cycle(
        &self,
        node: &NodeRef,
        handler: HandlerId,
        schedule_id: u32,
        schedule: Arc<dyn Schedule>,
        first: SimTime,
    ) -> Result<(), SimError> {
        self.queue.add(Event::to_node(
            first,
            None,
            node.clone(),
            handler,
            Payload::cycle(schedule_id, schedule),
        ))
    }

    /// Run until the queue empties, the end time is reached, a control
    /// requests shutdown, or a task fails.
    pub fn run(&mut self) -> Result<RunSummary, RunnerError> {
        let start = Instant::now();
        self.counters = RunCounters::default();
        self.next_log = SimTime::ZERO;
        self.failure = None;

        let mut batch = std::mem::take(&mut self.batch);
        let outcome = self.drive(&mut batch);
        batch.clear();
        self.batch = batch;

        let stop_reason = match outcome {
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "Simulation aborted");
                return Err(e.into());
            }
        };

        let unprocessed = self.queue.len();
        self.run_final_pass()?;

        let summary = RunSummary {
            stop_reason,
            events_processed: self.counters.events_processed,
            batches: self.counters.batches,
            largest_batch: self.counters.largest_batch,
            final_time: self.counters.final_time,
            unprocessed,
            wall_time_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            reason = ?summary.stop_reason,
            events = summary.events_processed,
            batches = summary.batches,
            unprocessed = summary.unprocessed,
            "Simulation finished"
        );
        Ok(summary)
    }

    fn drive(&mut self, batch: &mut EventBatch) -> Result<StopReason, SimError> {
        loop {
            self.queue.remove_many(self.config.batch_capacity, batch);
            let size = batch.len();
            self.counters.batches += 1;
            self.counters.largest_batch = self.counters.largest_batch.max(size);

            let stop = match size {
                0 => {
                    self.counters.batches -= 1;
                    info!(time = self.counters.final_time.ticks(), "Queue is empty, quitting");
                    Some(StopReason::QueueEmpty)
                }
                1 => match batch.drain().next() {
                    Some(event) => self.run_single(event)?,
                    None => None,
                },
                _ => self.run_batch(batch)?,
            };
            if let Some(reason) = stop {
                return Ok(reason);
            }
        }
    }

    /// Progress marker and cutoff check. Returns `false` once the end time is reached.
    fn admit(&mut self, time: SimTime) -> bool {
        if time >= self.next_log {
            info!(time = time.ticks(), events = self.counters.events_processed, "Current time");
            while time >= self.next_log {
                self.next_log = match self.next_log.checked_add(self.config.log_interval) {
                    Some(next) => next,
                    None => SimTime::MAX,
                };
                if self.next_log == SimTime::MAX {
                    break;
                }
            }
        }
        if time >= self.config.end_time {
            return false;
        }
        self.counters.final_time = time;
        true
    }

    fn end_reached(&self) -> StopReason {
        info!(unprocessed = self.queue.len(), "Reached end time, quitting");
        StopReason::EndTimeReached
    }

    /// Return popped but unexecuted events to the queue.
    fn requeue(&self, events: impl IntoIterator<Item = Event>) -> Result<(), SimError> {
        for event in events {
            self.queue.add(event)?;
        }
        Ok(())
    }

    fn run_single(&mut self, event: Event) -> Result<Option<StopReason>, SimError> {
        if !self.admit(event.time) {
            self.queue.add(event)?;
            return Ok(Some(self.end_reached()));
        }
        match event.target.clone() {
            None => {
                let stop = self.run_control(&event)?;
                Ok(stop.then_some(StopReason::ControlRequested))
            }
            Some(target) => {
                if !target.is_live() {
                    warn!(entity = target.id().0, time = event.time.ticks(), "Skipping event for dead entity");
                    return Ok(None);
                }
                let time = event.time;
                execute_guarded(&self.queue, &target, event).map_err(|cause| {
                    error!(entity = target.id().0, time = time.ticks(), error = %cause, "Task failed");
                    SimError::TaskFailed {
                        entity: target.id(),
                        time,
                        failures: 1,
                        cause: Box::new(cause),
                    }
                })?;
                self.counters.events_processed += 1;
                Ok(None)
            }
        }
    }

    fn run_batch(&mut self, batch: &mut EventBatch) -> Result<Option<StopReason>, SimError> {
        debug!(size = batch.len(), "Dispatching batch");
        let mut leftover = Vec::new();
        let mut events = batch.drain();

        while let Some(event) = events.next() {
            if !self.admit(event.time) {
                leftover.push(event);
                leftover.extend(events.by_ref());
                break;
            }
            let Some(target) = event.target.clone() else {
                self.pending_controls.push(event);
                continue;
            };
            let entity = target.id();
            if let Some(prior) = self.pending_tasks.remove(&entity) {
                let prior_time = prior.time;
                if let Err(cause) = prior.join(entity) {
                    self.record_failure(entity, prior_time, cause);
                    break;
                }
                self.counters.events_processed += 1;
            }
            if !target.is_live() {
                warn!(entity = entity.0, time = event.time.ticks(), "Skipping event for dead entity");
                continue;
            }
            let handle = self.submit(target, event);
            self.pending_tasks.insert(entity, handle);
        }
        drop(events);

        self.wait_for_termination();
        if let Some(failure) = self.failure.take() {
            self.pending_controls.clear();
            return Err(failure.into_error());
        }
        if !leftover.is_empty() {
            // Controls of a batch cut short by the end time do not run.
            let controls = std::mem::take(&mut self.pending_controls);
            self.requeue(controls.into_iter().chain(leftover))?;
            return Ok(Some(self.end_reached()));
        }
        let stop = self.run_pending_controls()?;
        Ok(stop.then_some(StopReason::ControlRequested))
    }

    fn submit(&self, target: NodeRef, event: Event) -> TaskHandle {
        let (tx, rx) = bounded(1);
        let time = event.time;
        let queue = self.queue.clone();
        self.pool.spawn(move || {
            let outcome = execute_guarded(&queue, &target, event);
            let _ = tx.send(outcome);
        });
        TaskHandle { time, done: rx }
    }

    fn record_failure(&mut self, entity: EntityId, time: SimTime, cause: SimError) {
        error!(entity = entity.0, time = time.ticks(), error = %cause, "Task failed");
        match &mut self.failure {
            Some(first) => first.count += 1,
            None => {
                self.failure = Some(Failure {
                    entity,
                    time,
                    cause,
                    count: 1,
                })
            }
        }
    }

    /// Barrier: join every outstanding task.
    fn wait_for_termination(&mut self) {
        let pending: Vec<(EntityId, TaskHandle)> = self.pending_tasks.drain().collect();
        for (entity, handle) in pending {
            let time = handle.time;
            match handle.join(entity) {
                Ok(()) => self.counters.events_processed += 1,
                Err(cause) => self.record_failure(entity, time, cause),
            }
        }
    }

    fn run_pending_controls(&mut self) -> Result<bool, SimError> {
        let mut stop = false;
        let controls = std::mem::take(&mut self.pending_controls);
        for event in &controls {
            stop |= self.run_control(event)?;
        }
        Ok(stop)
    }

    /// Execute a control event and re-arm it from its schedule.
    fn run_control(&mut self, event: &Event) -> Result<bool, SimError> {
        let id = event.handler;
        let queue = self.queue.clone();
        let registered = self
            .controls
            .get_mut(id.0 as usize)
            .ok_or(SimError::ControlNotFound(id))?;
        let mut ctx = SimContext::new(event.time, queue);
        let stop = registered.control.execute(&mut ctx)?;
        let delay = registered.schedule.next_delay(event.time);
        if delay >= 0 {
            self.queue.add(Event::control(event.time.after(delay)?, id))?;
        }
        self.counters.events_processed += 1;
        if stop {
            info!(control = %id, time = event.time.ticks(), "Control requested shutdown");
        }
        Ok(stop)
    }

    /// Post-simulation pass over controls that asked for a final run.
    fn run_final_pass(&mut self) -> Result<(), SimError> {
        let now = self.counters.final_time;
        for (index, registered) in self.controls.iter_mut().enumerate() {
            if registered.schedule.is_finished() {
                debug!(control = index, "Running final control pass");
                let mut ctx = SimContext::new(now, self.queue.clone());
                registered.control.execute(&mut ctx)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("controls", &self.controls.len())
            .finish_non_exhaustive()
    }
}
