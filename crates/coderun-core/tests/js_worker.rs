//! Worker process isolation for JavaScript evaluation

use coderun_core::errors::ErrorKind;
use coderun_core::executors::{CodeExecutor, InterpreterExecutor, InterpreterLimits};
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const WORKER: &str = env!("CARGO_BIN_EXE_coderun-js-worker");

fn isolated_executor(timeout_ms: u64, grace_ms: u64) -> InterpreterExecutor {
    InterpreterExecutor::new(InterpreterLimits {
        timeout: Duration::from_millis(timeout_ms),
        wrapper_grace: Duration::from_millis(grace_ms),
        ..Default::default()
    })
    .with_worker(WORKER)
}

/// Live processes running `program`. Zombies have no readable exe link and are skipped.
#[cfg(target_os = "linux")]
fn live_processes_of(program: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| std::fs::read_link(entry.path().join("exe")).ok())
        .filter(|exe| exe == program)
        .collect()
}

#[tokio::test]
#[serial]
async fn test_worker_evaluates_submission() {
    let executor = isolated_executor(2000, 300);
    assert!(executor.is_isolated());

    let result = executor
        .run("console.log([1, 2], {k: 1}); console.error('note'); 40 + 2")
        .await;
    assert_eq!(
        result.output.as_deref(),
        Some("[1, 2] {\"k\":1}\nReturn value: 42")
    );
    assert_eq!(result.error.as_deref(), Some("note"));
    assert!(result.is_success());

    let result = executor.run("undefinedName").await;
    assert!(result.error.unwrap().starts_with("Reference Error: "));
    assert_eq!(result.error_kind, Some(ErrorKind::Runtime));
}

#[tokio::test]
#[serial]
async fn test_backtracking_regex_worker_is_killed_at_deadline() {
    let executor = isolated_executor(500, 300);
    let started = Instant::now();

    let result = executor
        .run("console.log(/(a+)+$/.test('a'.repeat(34) + 'b'))")
        .await;

    assert_eq!(
        result.error.as_deref(),
        Some("Code execution timed out (500 ms limit)")
    );
    assert_eq!(result.error_kind, Some(ErrorKind::Runtime));
    assert!(started.elapsed() < Duration::from_secs(3));

    #[cfg(target_os = "linux")]
    {
        let program = std::fs::canonicalize(WORKER).unwrap();
        let deadline = Instant::now() + Duration::from_millis(300);
        while !live_processes_of(&program).is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(
            live_processes_of(&program).is_empty(),
            "worker still running after the grace period"
        );
    }

    let result = executor.run("console.log('next')").await;
    assert_eq!(result.output.as_deref(), Some("next"));
}
