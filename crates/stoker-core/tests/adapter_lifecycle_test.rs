//! Lifecycle tests for the engine adapter: spawn, memoized start, reset,
//! stop, and clean, driven against real fake-engine subprocesses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use stoker_core::adapter::{AdapterState, EngineAdapter};
use stoker_core::config::EngineConfig;
use stoker_core::error::AdapterError;
use stoker_core::sink::{CountingDiagnostics, MemorySink};
use stoker_test_utils::FakeEngine;

// ===========================================================================
// Helpers
// ===========================================================================

fn test_config(binary: PathBuf, root: &Path) -> EngineConfig {
    EngineConfig::new(binary, root, "test-arch").with_response_timeout(Duration::from_secs(2))
}

fn adapter_for(config: EngineConfig) -> (EngineAdapter, MemorySink) {
    let sink = MemorySink::new();
    let adapter = EngineAdapter::new(
        config,
        std::sync::Arc::new(sink.clone()),
        std::sync::Arc::new(CountingDiagnostics::new()),
    )
    .expect("adapter construction should succeed");
    (adapter, sink)
}

/// Pids of every engine instance the fake script ever started, oldest first.
fn spawned_pids(root: &Path) -> Vec<u32> {
    let log = root.join("spawns.log");
    let contents = std::fs::read_to_string(&log).unwrap_or_default();
    contents
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Signal 0 probes for existence without delivering anything.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// A fake engine that records its pid on every spawn.
fn logging_engine(root: &Path) -> PathBuf {
    FakeEngine::new()
        .with_prelude("echo $$ >> spawns.log")
        .write(root)
}

// ===========================================================================
// Start
// ===========================================================================

#[tokio::test]
async fn start_spawns_and_waits_for_readiness() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let (adapter, _sink) = adapter_for(test_config(binary, tmp.path()));

    let started = adapter.start().await.unwrap();
    assert!(started, "first start must spawn");
    assert_eq!(adapter.state(), AdapterState::Running);
    assert!(adapter.engine_pid().await.is_some());

    let started_again = adapter.start().await.unwrap();
    assert!(!started_again, "second start must be a no-op");

    adapter.stop().await;
}

#[tokio::test]
async fn concurrent_starts_spawn_exactly_one_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let (adapter, _sink) = adapter_for(test_config(binary, tmp.path()));

    let (a, b, c) = tokio::join!(adapter.start(), adapter.start(), adapter.start());
    let spawned = [a.unwrap(), b.unwrap(), c.unwrap()]
        .iter()
        .filter(|started| **started)
        .count();

    assert_eq!(spawned, 1, "exactly one caller observes the spawn");
    assert_eq!(spawned_pids(tmp.path()).len(), 1, "exactly one process spawned");
    assert_eq!(adapter.state(), AdapterState::Running);

    adapter.stop().await;
}

#[tokio::test]
async fn start_times_out_when_the_banner_never_arrives() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = FakeEngine::new().with_banner("").write(tmp.path());
    let config =
        test_config(binary, tmp.path()).with_response_timeout(Duration::from_millis(300));
    let (adapter, _sink) = adapter_for(config);

    match adapter.start().await {
        Err(AdapterError::WatchTimeout(_)) => {}
        other => panic!("expected WatchTimeout, got {other:?}"),
    }
    assert_eq!(adapter.state(), AdapterState::NotStarted);
    assert_eq!(adapter.engine_pid().await, None);
}

// ===========================================================================
// Reset / stop
// ===========================================================================

#[cfg(unix)]
#[tokio::test]
async fn reset_replaces_the_engine_instance() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let (adapter, _sink) = adapter_for(test_config(binary, tmp.path()));

    adapter.start().await.unwrap();
    let old_pid = adapter.engine_pid().await.unwrap();

    let started = adapter.reset().await.unwrap();
    assert!(started, "reset must spawn a fresh engine");
    let new_pid = adapter.engine_pid().await.unwrap();

    assert_ne!(old_pid, new_pid);
    assert!(!process_alive(old_pid), "old instance must be terminated");
    assert!(process_alive(new_pid));
    assert_eq!(adapter.state(), AdapterState::Running);

    adapter.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn stop_kills_the_engine_and_notifies_the_sink() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let (adapter, sink) = adapter_for(test_config(binary, tmp.path()));

    adapter.start().await.unwrap();
    let pid = adapter.engine_pid().await.unwrap();

    adapter.stop().await;
    assert_eq!(adapter.state(), AdapterState::Stopped);
    assert!(!process_alive(pid));
    assert!(sink.contents().contains("[engine killed]"));

    // A stopped adapter can be started again.
    assert!(adapter.start().await.unwrap());
    adapter.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn at_most_one_engine_is_alive_after_any_sequence() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let (adapter, _sink) = adapter_for(test_config(binary, tmp.path()));

    adapter.start().await.unwrap();
    adapter.start().await.unwrap();
    adapter.reset().await.unwrap();
    adapter.reset().await.unwrap();
    adapter.start().await.unwrap();

    let alive: Vec<u32> = spawned_pids(tmp.path())
        .into_iter()
        .filter(|pid| process_alive(*pid))
        .collect();
    assert_eq!(alive.len(), 1, "exactly one engine alive, got {alive:?}");

    adapter.stop().await;
    let alive_after_stop = spawned_pids(tmp.path())
        .into_iter()
        .filter(|pid| process_alive(*pid))
        .count();
    assert_eq!(alive_after_stop, 0, "no engine alive after stop");
}

// ===========================================================================
// Clean
// ===========================================================================

#[tokio::test]
async fn clean_reports_and_forces_not_started() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let config = test_config(binary, tmp.path()).with_clean_command(vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo scrubbed build tree".to_string(),
    ]);
    let (adapter, sink) = adapter_for(config);

    adapter.start().await.unwrap();
    assert_eq!(adapter.state(), AdapterState::Running);

    let text = adapter.clean().await.unwrap();
    assert!(text.contains("scrubbed build tree"));
    assert_eq!(adapter.state(), AdapterState::NotStarted);
    assert_eq!(adapter.engine_pid().await, None);

    let contents = sink.contents();
    assert!(contents.contains("[clean: sh -c"));
    assert!(contents.contains("scrubbed build tree"));
    assert!(contents.contains("[engine build state discarded]"));
}

#[cfg(unix)]
#[tokio::test]
async fn clean_terminates_a_running_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let config =
        test_config(binary, tmp.path()).with_clean_command(vec!["true".to_string()]);
    let (adapter, _sink) = adapter_for(config);

    adapter.start().await.unwrap();
    let pid = adapter.engine_pid().await.unwrap();

    adapter.clean().await.unwrap();
    assert!(!process_alive(pid));
}

#[tokio::test]
async fn failing_clean_still_forces_not_started() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let config = test_config(binary, tmp.path()).with_clean_command(vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo half-cleaned; exit 9".to_string(),
    ]);
    let (adapter, sink) = adapter_for(config);

    adapter.start().await.unwrap();

    match adapter.clean().await {
        Err(AdapterError::CleanFailed { output, .. }) => {
            assert!(output.contains("half-cleaned"));
        }
        other => panic!("expected CleanFailed, got {other:?}"),
    }
    assert_eq!(adapter.state(), AdapterState::NotStarted);
    assert!(sink.contents().contains("half-cleaned"));
}

#[tokio::test]
async fn clean_works_without_a_running_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let binary = logging_engine(tmp.path());
    let config =
        test_config(binary, tmp.path()).with_clean_command(vec!["true".to_string()]);
    let (adapter, _sink) = adapter_for(config);

    adapter.clean().await.unwrap();
    assert_eq!(adapter.state(), AdapterState::NotStarted);
    assert!(spawned_pids(tmp.path()).is_empty(), "clean must not spawn");
}
