// Deadline enforcement against a real child process.
//
// The claude adapter is pointed at a stub script that sleeps far past the
// configured deadline. The run must fail fast with a timeout outcome and
// leave no orphaned child behind.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, Instant};

use ralph_lib::metrics::RunMetrics;
use ralph_lib::types::IterationOutcome;
use ralph_lib::{AgentKind, RalphConfig, RunState, Supervisor};

const SCRIPT_NAME: &str = "ralph-timeout-stub.sh";

#[tokio::test]
async fn timeout_kills_the_child_and_fails_the_iteration() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PROMPT.md"), "# Task\nSleep forever.\n").unwrap();

    let script = dir.path().join(SCRIPT_NAME);
    std::fs::write(&script, "#!/bin/sh\nsleep 60\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    // this test binary owns the variable; nothing else in it reads the env
    std::env::set_var("RALPH_CLAUDE_PATH", &script);

    let config = RalphConfig {
        agent: AgentKind::Claude,
        max_iterations: 3,
        max_consecutive_failures: 1,
        adapter_timeout_seconds: 1,
        cancel_grace_seconds: 1,
        ..RalphConfig::default()
    };

    let started = Instant::now();
    let mut supervisor = Supervisor::new(config, dir.path()).await.unwrap();
    let report = supervisor.run().await.unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.iterations_recorded, 1);
    // terminate + grace, nowhere near the child's 60s sleep
    assert!(started.elapsed() < Duration::from_secs(20));

    let metrics = RunMetrics::load(report.metrics_path.as_ref().unwrap()).unwrap();
    assert_eq!(metrics.iterations[0].outcome, IterationOutcome::Timeout);
    assert_eq!(
        metrics.iterations[0].trigger_reason.as_deref(),
        Some("timeout")
    );

    // give the reaper a moment, then sweep the process table
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        !script_still_running(),
        "stub child survived the supervisor"
    );
}

/// Scan /proc for any process whose command line mentions the stub script.
fn script_still_running() -> bool {
    let proc = std::path::Path::new("/proc");
    if !proc.is_dir() {
        return false;
    }
    let entries = match std::fs::read_dir(proc) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(cmdline) = std::fs::read(entry.path().join("cmdline")) {
            if String::from_utf8_lossy(&cmdline).contains(SCRIPT_NAME) {
                return true;
            }
        }
    }
    false
}
