//! Built-in ring gossip workload.
//!
//! Every node runs a [`GossipProtocol`] on a periodic schedule. On each cycle
//! a node starts a rumor at a random peer; rumors are then forwarded around
//! the ring for a fixed number of hops. A [`QueueProbe`] control samples the
//! queue length and an optional [`ShutdownAfter`] control stops the run early.

use crate::config::WorkloadConfig;
use crate::{Engine, RunnerError};
use bigsim_common::{
    Control, EntityId, Handler, HandlerId, Node, NodeRef, Payload, PeriodicSchedule, SimContext,
    SimError, SimTime,
};
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Handler id of the gossip protocol on every ring node.
pub const GOSSIP: HandlerId = HandlerId(0);

const GOSSIP_SCHEDULE: u32 = 0;

/// Hops a rumor travels before it is dropped.
const MAX_HOPS: u32 = 3;

/// Upper bound of the per-message delay, in ticks.
const MAX_LATENCY: i64 = 5;

type PeerTable = Arc<RwLock<Vec<NodeRef>>>;

// ============================================================================
// Statistics
// ============================================================================

/// Counters shared by all nodes of the ring.
#[derive(Debug, Default)]
pub struct GossipStats {
    cycles: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    probes: AtomicU64,
    max_queue_len: AtomicU64,
}

impl GossipStats {
    /// Take a consistent-enough copy of the counters.
    pub fn snapshot(&self, nodes: usize) -> WorkloadReport {
        WorkloadReport {
            nodes,
            cycles: self.cycles.load(Ordering::Relaxed),
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
            probes: self.probes.load(Ordering::Relaxed),
            max_queue_len: self.max_queue_len.load(Ordering::Relaxed),
        }
    }
}

/// Workload results reported next to the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadReport {
    /// Number of ring nodes.
    pub nodes: usize,
    /// Gossip cycles executed.
    pub cycles: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Messages delivered.
    pub messages_received: u64,
    /// Queue probe executions, including the final pass.
    pub probes: u64,
    /// Largest queue length seen by the probe.
    pub max_queue_len: u64,
}

// ============================================================================
// Gossip Protocol
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Rumor {
    origin: EntityId,
    hops: u32,
}

/// Ring gossip handler.
pub struct GossipProtocol {
    index: usize,
    rng: ChaCha8Rng,
    peers: PeerTable,
    stats: Arc<GossipStats>,
}

impl GossipProtocol {
    fn peer(&self, index: usize) -> Option<NodeRef> {
        let peers = self.peers.read();
        if peers.is_empty() {
            return None;
        }
        peers.get(index % peers.len()).cloned()
    }

    fn send(&mut self, ctx: &mut SimContext, target: &NodeRef, rumor: Rumor) -> Result<(), SimError> {
        let delay = self.rng.gen_range(1..=MAX_LATENCY);
        ctx.send(delay, target, GOSSIP, Payload::message(rumor))?;
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Handler for GossipProtocol {
    fn process_event(
        &mut self,
        ctx: &mut SimContext,
        _source: Option<EntityId>,
        payload: &Payload,
    ) -> Result<(), SimError> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let Some(rumor) = payload.downcast_ref::<Rumor>().copied() else {
            return Ok(());
        };
        if rumor.hops >= MAX_HOPS {
            return Ok(());
        }
        if let Some(next) = self.peer(self.index + 1) {
            self.send(
                ctx,
                &next,
                Rumor {
                    origin: rumor.origin,
                    hops: rumor.hops + 1,
                },
            )?;
        }
        Ok(())
    }

    fn advance_cycle(&mut self, ctx: &mut SimContext, _schedule_id: u32) -> Result<(), SimError> {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        let count = self.peers.read().len();
        if count < 2 {
            return Ok(());
        }
        let offset = self.rng.gen_range(1..count);
        if let Some(target) = self.peer(self.index + offset) {
            debug!(node = self.index, peer = target.id().0, "Starting rumor");
            self.send(
                ctx,
                &target,
                Rumor {
                    origin: EntityId(self.index as u64),
                    hops: 0,
                },
            )?;
        }
        Ok(())
    }
}

/// A ring node carrying a single gossip handler.
pub struct GossipNode {
    gossip: GossipProtocol,
}

impl Node for GossipNode {
    fn handler_mut(&mut self, handler: HandlerId) -> Option<&mut dyn Handler> {
        (handler == GOSSIP).then_some(&mut self.gossip as &mut dyn Handler)
    }
}

// ============================================================================
// Controls
// ============================================================================

/// Samples the queue length.
pub struct QueueProbe {
    stats: Arc<GossipStats>,
}

impl Control for QueueProbe {
    fn execute(&mut self, ctx: &mut SimContext) -> Result<bool, SimError> {
        let len = ctx.queue().len();
        self.stats.probes.fetch_add(1, Ordering::Relaxed);
        self.stats.max_queue_len.fetch_max(len, Ordering::Relaxed);
        info!(time = ctx.now().ticks(), queue_len = len, "Queue probe");
        Ok(false)
    }
}

/// Requests shutdown once it runs.
pub struct ShutdownAfter;

impl Control for ShutdownAfter {
    fn execute(&mut self, ctx: &mut SimContext) -> Result<bool, SimError> {
        info!(time = ctx.now().ticks(), "Shutdown requested");
        Ok(true)
    }
}

// ============================================================================
// Workload
// ============================================================================

/// Builds the ring and collects its statistics.
pub struct RingWorkload {
    config: WorkloadConfig,
    peers: PeerTable,
    stats: Arc<GossipStats>,
}

impl RingWorkload {
    /// Create a workload; nothing is scheduled until [`RingWorkload::install`].
    pub fn new(config: WorkloadConfig) -> Self {
        RingWorkload {
            config,
            peers: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(GossipStats::default()),
        }
    }

    /// Create the nodes and schedule their cycles and the controls.
    pub fn install(&self, engine: &mut Engine) -> Result<(), RunnerError> {
        self.config.validate()?;
        let end_time = engine.config().end_time;
        let period = self.config.period;
        let schedule = Arc::new(PeriodicSchedule::every(period).until(end_time));

        let nodes: Vec<NodeRef> = (0..self.config.nodes)
            .map(|index| {
                let gossip = GossipProtocol {
                    index,
                    rng: ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(index as u64)),
                    peers: Arc::clone(&self.peers),
                    stats: Arc::clone(&self.stats),
                };
                NodeRef::new(EntityId(index as u64), GossipNode { gossip })
            })
            .collect();
        *self.peers.write() = nodes.clone();

        for (index, node) in nodes.iter().enumerate() {
            let first = SimTime::from_ticks(index as i64 % period);
            engine.schedule_cycle(node, GOSSIP, GOSSIP_SCHEDULE, schedule.clone(), first)?;
        }

        let probe_every = engine.config().log_interval;
        engine.add_control(
            Box::new(QueueProbe {
                stats: Arc::clone(&self.stats),
            }),
            Arc::new(PeriodicSchedule::every(probe_every).with_final_run()),
            Some(SimTime::ZERO),
        )?;

        if let Some(at) = self.config.stop_after {
            engine.add_control(
                Box::new(ShutdownAfter),
                Arc::new(PeriodicSchedule::every(0)),
                Some(at),
            )?;
        }

        info!(nodes = self.config.nodes, period, "Ring workload installed");
        Ok(())
    }

    /// Current statistics.
    pub fn report(&self) -> WorkloadReport {
        self.stats.snapshot(self.config.nodes)
    }
}

impl Drop for RingWorkload {
    fn drop(&mut self) {
        // Nodes hold the peer table; clearing it releases them.
        self.peers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::StopReason;

    fn engine(end: i64) -> Engine {
        Engine::new(
            EngineConfig::default()
                .with_end_time(SimTime::from_ticks(end))
                .with_log_interval(100)
                .with_worker_threads(2),
        )
        .unwrap()
    }

    #[test]
    fn test_ring_runs_to_end_time() {
        let mut engine = engine(200);
        let workload = RingWorkload::new(WorkloadConfig {
            nodes: 8,
            period: 10,
            seed: 1,
            stop_after: None,
        });
        workload.install(&mut engine).unwrap();

        let summary = engine.run().unwrap();
        let report = workload.report();

        assert_eq!(summary.stop_reason, StopReason::EndTimeReached);
        // At most 20 cycles per node fit before the end time; the last batch
        // may cut a few short.
        assert!(report.cycles <= 8 * 20);
        assert!(report.cycles >= 8 * 15);
        assert!(report.messages_sent >= report.cycles);
        assert!(report.messages_received <= report.messages_sent);
        // Probes at 0 and 100, plus the final pass.
        assert_eq!(report.probes, 3);
    }

    #[test]
    fn test_shutdown_control_stops_early() {
        let mut engine = engine(10_000);
        let workload = RingWorkload::new(WorkloadConfig {
            nodes: 4,
            period: 5,
            seed: 0,
            stop_after: Some(SimTime::from_ticks(50)),
        });
        workload.install(&mut engine).unwrap();

        let summary = engine.run().unwrap();
        assert_eq!(summary.stop_reason, StopReason::ControlRequested);
        assert!(summary.final_time <= SimTime::from_ticks(100));
        assert!(summary.unprocessed > 0);
    }

    #[test]
    fn test_single_node_never_sends() {
        let mut engine = engine(100);
        let workload = RingWorkload::new(WorkloadConfig {
            nodes: 1,
            period: 10,
            seed: 0,
            stop_after: None,
        });
        workload.install(&mut engine).unwrap();
        engine.run().unwrap();

        let report = workload.report();
        assert!(report.cycles > 0);
        assert_eq!(report.messages_sent, 0);
    }
}
