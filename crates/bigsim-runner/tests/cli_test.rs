//! CLI integration tests for the `bigsim` binary.
//!
//! These tests run the compiled binary end to end and check the JSON run
//! summary written to stdout.

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

use serde::Deserialize;

// ============================================================================
// JSON Deserialization Types for the Run Summary
// ============================================================================

#[derive(Debug, Deserialize)]
struct RunReport {
    stop_reason: String,
    events_processed: u64,
    batches: u64,
    largest_batch: usize,
    final_time: i64,
    unprocessed: u64,
    queue: String,
    workload: WorkloadReport,
}

#[derive(Debug, Deserialize)]
struct WorkloadReport {
    nodes: usize,
    cycles: u64,
    messages_sent: u64,
    messages_received: u64,
    probes: u64,
}

// ============================================================================
// Test Helper Functions
// ============================================================================

fn bigsim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bigsim"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to run bigsim")
}

fn run_report(args: &[&str]) -> RunReport {
    let output = bigsim(args);
    assert!(
        output.status.success(),
        "bigsim failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not a run summary")
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_run_with_flags() {
    let report = run_report(&[
        "run",
        "--end-time",
        "300",
        "--nodes",
        "6",
        "--period",
        "10",
        "--seed",
        "42",
        "-j",
        "2",
    ]);

    assert_eq!(report.stop_reason, "end_time_reached");
    assert_eq!(report.queue, "segmented-heap");
    assert_eq!(report.workload.nodes, 6);
    assert!(report.workload.cycles > 0);
    assert!(report.workload.messages_sent >= report.workload.cycles);
    assert!(report.workload.messages_received <= report.workload.messages_sent);
    assert!(report.events_processed >= report.workload.cycles);
    assert!(report.batches > 0);
    assert!(report.largest_batch >= 1);
    assert!(report.final_time < 300);
    assert!(report.unprocessed > 0);
    assert!(report.workload.probes >= 1);
}

#[test]
fn test_config_files_merge_and_flags_override() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    fs::write(
        &base,
        "engine:\n  end_time: 5000\n  queue: binary-heap\n  worker_threads: 2\nworkload:\n  nodes: 3\n",
    )
    .unwrap();
    fs::write(&overlay, "workload:\n  nodes: 5\n  stop_after: 120\n").unwrap();

    let report = run_report(&[
        "run",
        "-c",
        base.to_str().unwrap(),
        "-c",
        overlay.to_str().unwrap(),
        "--period",
        "7",
    ]);

    assert_eq!(report.queue, "binary-heap");
    assert_eq!(report.workload.nodes, 5);
    assert_eq!(report.stop_reason, "control_requested");
    assert!(report.final_time <= 170);
}

#[test]
fn test_unknown_queue_fails() {
    let output = bigsim(&["run", "--queue", "calendar", "--end-time", "10"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("calendar"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(&path, "engine:\n  batch_capacity: 0\n").unwrap();

    let output = bigsim(&["run", "-c", path.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("batch_capacity"));
}

#[test]
fn test_queues_lists_builtins() {
    let output = bigsim(&["queues"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("segmented-heap (default)"));
    assert!(stdout.contains("binary-heap"));
}
