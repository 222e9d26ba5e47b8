// Shared subprocess execution
//
// Every one-shot adapter invocation funnels through run_with_deadline: the
// child gets piped stdio, a hard deadline, capped output capture, and a
// terminate-then-kill teardown that never leaves an orphan behind.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::AgentResponse;
use crate::utils::string::{single_line, truncate_with_ellipsis};

const READ_CHUNK: usize = 8192;
const STDERR_EXCERPT_BYTES: usize = 500;

/// What to run. The prompt always travels as a plain positional argument,
/// never through a shell.
pub(crate) struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Environment variables removed from the child (e.g. API keys the
    /// agent must not see)
    pub env_remove: Vec<String>,
}

pub(crate) struct ExecLimits {
    pub deadline: Duration,
    pub grace: Duration,
    pub max_output_bytes: usize,
}

pub(crate) async fn run_with_deadline(
    spec: CommandSpec,
    limits: &ExecLimits,
    cancel: &CancellationToken,
) -> AgentResponse {
    let started = Instant::now();

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    for var in &spec.env_remove {
        cmd.env_remove(var);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return AgentResponse::failure(
                format!("failed to spawn {}: {}", spec.program, e),
                started.elapsed().as_secs_f64(),
            );
        }
    };

    // Readers must drain the pipes while we wait, or a chatty child
    // deadlocks on a full pipe buffer.
    let cap = limits.max_output_bytes;
    let stdout_task = child
        .stdout
        .take()
        .map(|stream| tokio::spawn(read_capped(stream, cap)));
    let stderr_task = child
        .stderr
        .take()
        .map(|stream| tokio::spawn(read_capped(stream, cap)));

    // The wait future (and its borrow of the child) is dropped when the
    // select resolves, so the kill path below gets the handle back.
    let waited = tokio::select! {
        result = tokio::time::timeout(limits.deadline, child.wait()) => match result {
            Ok(status) => Some(status.ok()),
            Err(_) => None, // deadline expired
        },
        _ = cancel.cancelled() => None,
    };
    let timed_out = waited.is_none();
    let status = match waited {
        Some(status) => status,
        None => terminate_then_kill(&mut child, limits.grace).await,
    };

    let (stdout, stdout_truncated) = join_reader(stdout_task).await;
    let (stderr, stderr_truncated) = join_reader(stderr_task).await;

    let mut output = String::from_utf8_lossy(&stdout).into_owned();
    if stdout_truncated || stderr_truncated {
        output.push_str(&format!("\n[output truncated at {} bytes]", cap));
    }

    let duration_seconds = started.elapsed().as_secs_f64();
    let exit_code = status.as_ref().and_then(|s| s.code());

    let error = if timed_out {
        "timeout".to_string()
    } else {
        match exit_code {
            Some(0) => String::new(),
            Some(code) => {
                let excerpt = truncate_with_ellipsis(
                    &single_line(&String::from_utf8_lossy(&stderr)),
                    STDERR_EXCERPT_BYTES,
                );
                if excerpt.is_empty() {
                    format!("exit status {}", code)
                } else {
                    format!("exit status {}: {}", code, excerpt)
                }
            }
            // no exit code on unix means the child died to a signal
            None => "killed by signal".to_string(),
        }
    };

    AgentResponse {
        success: exit_code == Some(0) && error.is_empty(),
        output,
        error,
        tokens_in: None,
        tokens_out: None,
        cost: None,
        duration_seconds,
        exit_code,
    }
}

/// Send SIGTERM, wait out the grace window, then force-kill. Always reaps.
async fn terminate_then_kill(child: &mut Child, grace: Duration) -> Option<std::process::ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // best-effort terminate; the kill below is the backstop
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status.ok();
    }
    let _ = child.kill().await;
    child.wait().await.ok()
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut reader: R, cap: usize) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    // keep draining so the child never blocks on the pipe
                    truncated = true;
                }
            }
        }
    }
    (buf, truncated)
}

async fn join_reader(
    task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>,
) -> (Vec<u8>, bool) {
    match task {
        Some(task) => task.await.unwrap_or((Vec::new(), false)),
        None => (Vec::new(), false),
    }
}

/// Look for an executable on PATH.
pub(crate) fn binary_on_path(name: &str) -> bool {
    if name.contains('/') {
        return std::path::Path::new(name).is_file();
    }
    let path = match std::env::var_os("PATH") {
        Some(path) => path,
        None => return false,
    };
    std::env::split_paths(&path).any(|dir| dir.join(name).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(deadline_secs: u64) -> ExecLimits {
        ExecLimits {
            deadline: Duration::from_secs(deadline_secs),
            grace: Duration::from_secs(1),
            max_output_bytes: 1024,
        }
    }

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            env_remove: vec![],
        }
    }

    #[tokio::test]
    async fn test_successful_command() {
        let response = run_with_deadline(
            spec("sh", &["-c", "echo hello"]),
            &limits(10),
            &CancellationToken::new(),
        )
        .await;
        assert!(response.success);
        assert_eq!(response.exit_code, Some(0));
        assert_eq!(response.output.trim(), "hello");
        assert!(response.error.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let response = run_with_deadline(
            spec("sh", &["-c", "echo boom >&2; exit 3"]),
            &limits(10),
            &CancellationToken::new(),
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.exit_code, Some(3));
        assert!(response.error.contains("exit status 3"));
        assert!(response.error.contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reaps() {
        let started = std::time::Instant::now();
        let response = run_with_deadline(
            spec("sh", &["-c", "sleep 60"]),
            &ExecLimits {
                deadline: Duration::from_millis(200),
                grace: Duration::from_millis(200),
                max_output_bytes: 1024,
            },
            &CancellationToken::new(),
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.error, "timeout");
        // terminate + grace, nowhere near the 60s sleep
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_behaves_as_timeout() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = run_with_deadline(
            spec("sh", &["-c", "sleep 60"]),
            &ExecLimits {
                deadline: Duration::from_secs(60),
                grace: Duration::from_millis(200),
                max_output_bytes: 1024,
            },
            &cancel,
        )
        .await;
        assert_eq!(response.error, "timeout");
    }

    #[tokio::test]
    async fn test_output_cap_truncates_and_annotates() {
        let response = run_with_deadline(
            spec("sh", &["-c", "yes x | head -c 100000"]),
            &limits(10),
            &CancellationToken::new(),
        )
        .await;
        assert!(response.output.contains("[output truncated at 1024 bytes]"));
        // cap plus the annotation line
        assert!(response.output.len() < 2048);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let response = run_with_deadline(
            spec("definitely-not-a-real-binary-xyz", &[]),
            &limits(10),
            &CancellationToken::new(),
        )
        .await;
        assert!(!response.success);
        assert!(response.error.contains("failed to spawn"));
        assert_eq!(response.exit_code, None);
    }

    #[test]
    fn test_binary_on_path() {
        assert!(binary_on_path("sh"));
        assert!(!binary_on_path("definitely-not-a-real-binary-xyz"));
    }
}
