//! # bigsim-runner library
//!
//! Library interface for the BigSim scheduling engine.
//!
//! This module re-exports the key types needed for running simulations
//! programmatically and for integration testing.
//!
//! ## Parallel Batches
//!
//! The [`Engine`] removes events from the queue in batches whose times lie
//! within a similarity window of the first one. Entity events of a batch are
//! executed concurrently on a worker pool, while events for the same entity
//! are serialized in pop order. Control events run serially after every
//! entity event of their batch has finished.
//!
//! ## Stopping
//!
//! A run stops when the queue is empty, when the next event reaches the
//! configured end time, when a control requests shutdown, or when a task
//! fails. Only the last case is an error.

pub mod config;
pub mod engine;
pub mod workload;

pub use bigsim_common::{SimError, SimTime};
pub use config::{load_configs, load_configs_from_str, EngineConfig, RunConfig, WorkloadConfig};
pub use engine::Engine;
pub use workload::{RingWorkload, WorkloadReport};

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Simulation error.
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Run Summary
// ============================================================================

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No events were left.
    QueueEmpty,
    /// The next event was at or after the end time.
    EndTimeReached,
    /// A control asked to stop.
    ControlRequested,
}

/// Statistics collected during a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Entity and control events executed.
    pub events_processed: u64,
    /// Batches removed from the queue.
    pub batches: u64,
    /// Size of the largest batch.
    pub largest_batch: usize,
    /// Time of the last admitted event.
    pub final_time: SimTime,
    /// Events left in the queue.
    pub unprocessed: u64,
    /// Wall clock time in milliseconds.
    pub wall_time_ms: u64,
}
