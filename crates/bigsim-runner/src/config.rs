//! Run configuration loaded from YAML files and command-line overrides.
//!
//! A configuration file has two optional sections:
//!
//! ```yaml
//! engine:
//!   end_time: 20000
//!   log_interval: 1000
//!   batch_capacity: 1024
//!   window: 50
//!   queue: segmented-heap
//!   worker_threads: 0
//! workload:
//!   nodes: 64
//!   period: 10
//!   seed: 7
//!   stop_after: 15000
//! ```
//!
//! Multiple files are merged in order; a key set in a later file overrides
//! the same key from an earlier one.

use crate::RunnerError;
use bigsim_common::SimTime;
use bigsim_queue::{DEFAULT_QUEUE, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// Engine Configuration
// ============================================================================

/// Scheduling engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Events at or after this time are left unprocessed.
    pub end_time: SimTime,
    /// Spacing of progress markers, in ticks.
    pub log_interval: i64,
    /// Maximum events removed per batch.
    pub batch_capacity: usize,
    /// Similarity window for batch removal, in ticks.
    pub window: i64,
    /// Registered queue kind.
    pub queue: String,
    /// Worker pool size. Zero picks the number of CPUs.
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            end_time: SimTime::from_ticks(10_000),
            log_interval: 1_000,
            batch_capacity: 1024,
            window: DEFAULT_WINDOW,
            queue: DEFAULT_QUEUE.to_string(),
            worker_threads: 0,
        }
    }
}

impl EngineConfig {
    /// Set the end time.
    pub fn with_end_time(mut self, end_time: SimTime) -> Self {
        self.end_time = end_time;
        self
    }

    /// Set the progress marker spacing.
    pub fn with_log_interval(mut self, log_interval: i64) -> Self {
        self.log_interval = log_interval;
        self
    }

    /// Set the maximum batch size.
    pub fn with_batch_capacity(mut self, batch_capacity: usize) -> Self {
        self.batch_capacity = batch_capacity;
        self
    }

    /// Set the similarity window.
    pub fn with_window(mut self, window: i64) -> Self {
        self.window = window;
        self
    }

    /// Select the queue kind.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the worker pool size.
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.batch_capacity == 0 {
            return Err(RunnerError::ConfigError(
                "batch_capacity must be at least 1".to_string(),
            ));
        }
        if self.log_interval <= 0 {
            return Err(RunnerError::ConfigError(format!(
                "log_interval must be positive, got {}",
                self.log_interval
            )));
        }
        if self.window < 0 {
            return Err(RunnerError::ConfigError(format!(
                "window must not be negative, got {}",
                self.window
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Workload Configuration
// ============================================================================

/// Parameters of the built-in ring gossip workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of nodes.
    pub nodes: usize,
    /// Gossip period in ticks.
    pub period: i64,
    /// Base RNG seed; node `i` uses `seed + i`.
    pub seed: u64,
    /// Request shutdown at this time, if set.
    pub stop_after: Option<SimTime>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            nodes: 16,
            period: 10,
            seed: 0,
            stop_after: None,
        }
    }
}

impl WorkloadConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.nodes == 0 {
            return Err(RunnerError::ConfigError("nodes must be at least 1".to_string()));
        }
        if self.period <= 0 {
            return Err(RunnerError::ConfigError(format!(
                "period must be positive, got {}",
                self.period
            )));
        }
        Ok(())
    }
}

// ============================================================================
// File Loading
// ============================================================================

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Workload settings.
    pub workload: WorkloadConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunConfigYaml {
    engine: EngineSection,
    workload: WorkloadSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EngineSection {
    end_time: Option<SimTime>,
    log_interval: Option<i64>,
    batch_capacity: Option<usize>,
    window: Option<i64>,
    queue: Option<String>,
    worker_threads: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WorkloadSection {
    nodes: Option<usize>,
    period: Option<i64>,
    seed: Option<u64>,
    stop_after: Option<SimTime>,
}

impl RunConfig {
    fn apply(&mut self, yaml: RunConfigYaml) {
        let engine = yaml.engine;
        if let Some(v) = engine.end_time {
            self.engine.end_time = v;
        }
        if let Some(v) = engine.log_interval {
            self.engine.log_interval = v;
        }
        if let Some(v) = engine.batch_capacity {
            self.engine.batch_capacity = v;
        }
        if let Some(v) = engine.window {
            self.engine.window = v;
        }
        if let Some(v) = engine.queue {
            self.engine.queue = v;
        }
        if let Some(v) = engine.worker_threads {
            self.engine.worker_threads = v;
        }

        let workload = yaml.workload;
        if let Some(v) = workload.nodes {
            self.workload.nodes = v;
        }
        if let Some(v) = workload.period {
            self.workload.period = v;
        }
        if let Some(v) = workload.seed {
            self.workload.seed = v;
        }
        if workload.stop_after.is_some() {
            self.workload.stop_after = workload.stop_after;
        }
    }

    /// Check value ranges of both sections.
    pub fn validate(&self) -> Result<(), RunnerError> {
        self.engine.validate()?;
        self.workload.validate()
    }
}

/// Load and merge configuration files. Later files override earlier ones.
///
/// An empty list yields the defaults.
pub fn load_configs<P: AsRef<Path>>(paths: &[P]) -> Result<RunConfig, RunnerError> {
    let yaml_strings = paths
        .iter()
        .map(std::fs::read_to_string)
        .collect::<Result<Vec<String>, std::io::Error>>()?;
    let yaml_strs: Vec<&str> = yaml_strings.iter().map(String::as_str).collect();
    load_configs_from_str(&yaml_strs)
}

/// Merge configuration documents given as YAML strings.
pub fn load_configs_from_str(yaml_strs: &[&str]) -> Result<RunConfig, RunnerError> {
    let mut config = RunConfig::default();
    for yaml_str in yaml_strs {
        if yaml_str.trim().is_empty() {
            continue;
        }
        let yaml: RunConfigYaml = serde_yaml::from_str(yaml_str)?;
        config.apply(yaml);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = load_configs_from_str(&[]).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.engine.end_time, SimTime::from_ticks(10_000));
        assert_eq!(config.engine.window, 50);
        assert_eq!(config.engine.queue, "segmented-heap");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_later_documents_override() {
        let base = "engine:\n  end_time: 500\n  queue: binary-heap\nworkload:\n  nodes: 4\n";
        let overlay = "engine:\n  end_time: 900\nworkload:\n  stop_after: 300\n";
        let config = load_configs_from_str(&[base, overlay]).unwrap();

        assert_eq!(config.engine.end_time, SimTime::from_ticks(900));
        assert_eq!(config.engine.queue, "binary-heap");
        assert_eq!(config.engine.batch_capacity, 1024);
        assert_eq!(config.workload.nodes, 4);
        assert_eq!(config.workload.stop_after, Some(SimTime::from_ticks(300)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = load_configs_from_str(&["engine:\n  end_tiem: 5\n"]).unwrap_err();
        assert!(matches!(err, RunnerError::Yaml(_)));
    }

    #[test]
    fn test_validation() {
        let config = EngineConfig::default().with_batch_capacity(0);
        assert!(matches!(config.validate(), Err(RunnerError::ConfigError(_))));
        let config = EngineConfig::default().with_log_interval(0);
        assert!(config.validate().is_err());
        let config = EngineConfig::default().with_window(-1);
        assert!(config.validate().is_err());

        let workload = WorkloadConfig {
            period: 0,
            ..WorkloadConfig::default()
        };
        assert!(workload.validate().is_err());
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("base.yaml");
        let second = dir.path().join("fast.yaml");
        std::fs::write(&first, "engine:\n  worker_threads: 2\n  window: 10\n").unwrap();
        std::fs::write(&second, "engine:\n  window: 0\n").unwrap();

        let config = load_configs(&[first, second]).unwrap();
        assert_eq!(config.engine.worker_threads, 2);
        assert_eq!(config.engine.window, 0);

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(load_configs(&[missing]), Err(RunnerError::Io(_))));
    }
}
