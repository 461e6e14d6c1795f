//! # bigsim
//!
//! CLI runner for the BigSim scheduling engine.
//!
//! Runs the built-in ring gossip workload and prints the run summary as JSON
//! on stdout. Logs go to stderr.

use bigsim_queue::{QueueRegistry, DEFAULT_QUEUE};
use bigsim_runner::{
    load_configs, Engine, RingWorkload, RunConfig, RunSummary, RunnerError, SimTime,
    WorkloadReport,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// BigSim - parallel discrete-event scheduling engine
#[derive(Parser, Debug)]
#[command(name = "bigsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the ring gossip workload
    Run(RunArgs),
    /// List registered event queue implementations
    Queues,
}

/// Arguments of the `run` command. Flags override configuration files.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path(s) to YAML configuration file(s). Multiple files are merged in order (later overrides earlier).
    #[arg(short, long = "config", value_name = "FILE")]
    pub configs: Vec<PathBuf>,

    /// End time in ticks
    #[arg(long)]
    pub end_time: Option<i64>,

    /// Ticks between progress markers
    #[arg(long)]
    pub log_interval: Option<i64>,

    /// Maximum events per batch
    #[arg(long)]
    pub batch_capacity: Option<usize>,

    /// Similarity window for batching, in ticks
    #[arg(long)]
    pub window: Option<i64>,

    /// Event queue implementation (see `bigsim queues`)
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Number of ring nodes
    #[arg(long)]
    pub nodes: Option<usize>,

    /// Gossip period in ticks
    #[arg(long)]
    pub period: Option<i64>,

    /// Random seed
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Request shutdown at this time
    #[arg(long)]
    pub stop_after: Option<i64>,
}

impl RunArgs {
    /// Load the configuration files and apply command-line overrides.
    fn resolve(&self) -> Result<RunConfig, RunnerError> {
        let mut config = load_configs(self.configs.as_slice())?;
        let engine = &mut config.engine;
        if let Some(v) = self.end_time {
            engine.end_time = SimTime::from_ticks(v);
        }
        if let Some(v) = self.log_interval {
            engine.log_interval = v;
        }
        if let Some(v) = self.batch_capacity {
            engine.batch_capacity = v;
        }
        if let Some(v) = self.window {
            engine.window = v;
        }
        if let Some(v) = &self.queue {
            engine.queue = v.clone();
        }
        if let Some(v) = self.threads {
            engine.worker_threads = v;
        }

        let workload = &mut config.workload;
        if let Some(v) = self.nodes {
            workload.nodes = v;
        }
        if let Some(v) = self.period {
            workload.period = v;
        }
        if let Some(v) = self.seed {
            workload.seed = v;
        }
        if let Some(v) = self.stop_after {
            workload.stop_after = Some(SimTime::from_ticks(v));
        }

        config.validate()?;
        Ok(config)
    }
}

/// Output of the `run` command.
#[derive(Debug, Serialize)]
struct RunReport {
    #[serde(flatten)]
    summary: RunSummary,
    queue: String,
    workload: WorkloadReport,
}

fn run_command(args: RunArgs) -> Result<RunReport, RunnerError> {
    let config = args.resolve()?;
    info!(
        configs = args.configs.len(),
        queue = %config.engine.queue,
        nodes = config.workload.nodes,
        "Starting run"
    );

    let mut engine = Engine::new(config.engine.clone())?;
    let workload = RingWorkload::new(config.workload.clone());
    workload.install(&mut engine)?;
    let summary = engine.run()?;

    Ok(RunReport {
        summary,
        queue: engine.queue().kind().to_string(),
        workload: workload.report(),
    })
}

fn queues_command() {
    let registry = QueueRegistry::default();
    for name in registry.names() {
        if name == DEFAULT_QUEUE {
            println!("{} (default)", name);
        } else {
            println!("{}", name);
        }
    }
}

fn main() -> Result<(), RunnerError> {
    // Initialize tracing subscriber with RUST_LOG env filter
    // Default to "info" level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let report = run_command(args).map_err(|e| {
                error!(error = %e, "Run failed");
                e
            })?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Queues => queues_command(),
    }

    Ok(())
}
