// ACP adapter
//
// Speaks a JSON-RPC-over-stdio agent protocol to a persistent child
// process. Requests carry monotonically increasing ids and are correlated
// to responses through a pending map; asynchronous notifications are
// dispatched to registered handlers; requests initiated by the agent
// (tool permission checks) are answered according to the configured
// permission mode. Shutdown tears the child down and reaps it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::exec::binary_on_path;
use super::{AdapterSettings, AgentAdapter};
use crate::config::PermissionMode;
use crate::types::{AgentKind, AgentResponse};

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Value>>>>;
type NotificationHandler = Box<dyn Fn(&Value) + Send + Sync>;
type HandlerMap = Arc<StdMutex<HashMap<String, NotificationHandler>>>;

struct AcpConnection {
    child: Child,
    outgoing: mpsc::Sender<String>,
    pending: PendingMap,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

pub struct AcpAdapter {
    settings: AdapterSettings,
    next_id: AtomicU64,
    connection: Mutex<Option<AcpConnection>>,
    handlers: HandlerMap,
}

impl AcpAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self {
            settings,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
            handlers: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn program_and_args(&self) -> (String, Vec<String>) {
        let mut parts = self.settings.acp.command.split_whitespace();
        let program = parts.next().unwrap_or("acp-agent").to_string();
        (program, parts.map(|s| s.to_string()).collect())
    }

    /// Register a handler for asynchronous notifications with this method.
    pub fn on_notification(
        &self,
        method: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(method.to_string(), Box::new(handler));
        }
    }

    async fn ensure_connected(&self) -> Result<(), String> {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let (program, args) = self.program_and_args();
        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&self.settings.working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

        let stdin = child.stdin.take().ok_or("failed to capture stdin")?;
        let stdout = child.stdout.take().ok_or("failed to capture stdout")?;

        // Writer task owns stdin; everything outgoing goes through the channel.
        let (outgoing, mut outgoing_rx) = mpsc::channel::<String>(32);
        let writer_task = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = outgoing_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let reader_task = tokio::spawn(read_loop(
            stdout,
            pending.clone(),
            self.handlers.clone(),
            outgoing.clone(),
            self.settings.acp.permission_mode.clone(),
            self.settings.acp.allowed_tools.iter().cloned().collect(),
        ));

        *slot = Some(AcpConnection {
            child,
            outgoing,
            pending,
            reader_task,
            writer_task,
        });
        Ok(())
    }

    /// Send a request and await its correlated response.
    async fn request(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        // the connection lock is released before awaiting the response
        {
            let slot = self.connection.lock().await;
            let connection = slot.as_ref().ok_or("not connected")?;
            if let Ok(mut pending) = connection.pending.lock() {
                pending.insert(id, tx);
            }
            let message = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            });
            connection
                .outgoing
                .send(message.to_string())
                .await
                .map_err(|_| "connection closed".to_string())?;
        }

        let result = tokio::select! {
            response = rx => response.map_err(|_| "connection closed".to_string()),
            _ = tokio::time::sleep(deadline) => Err("timeout".to_string()),
            _ = cancel.cancelled() => Err("timeout".to_string()),
        };

        if result.is_err() {
            // drop the pending slot so a late response is discarded
            let slot = self.connection.lock().await;
            if let Some(connection) = slot.as_ref() {
                if let Ok(mut pending) = connection.pending.lock() {
                    pending.remove(&id);
                }
            }
        }
        result
    }

    async fn teardown(&self) {
        let mut slot = self.connection.lock().await;
        if let Some(mut connection) = slot.take() {
            let _ = connection
                .outgoing
                .send(json!({"jsonrpc": "2.0", "method": "shutdown"}).to_string())
                .await;
            let _ = connection.child.kill().await;
            let _ = connection.child.wait().await;
            connection.reader_task.abort();
            connection.writer_task.abort();
        }
    }
}

#[async_trait]
impl AgentAdapter for AcpAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Acp
    }

    async fn available(&self) -> bool {
        let (program, _) = self.program_and_args();
        binary_on_path(&program) || Path::new(&program).is_file()
    }

    async fn execute(
        &self,
        prompt: &str,
        prompt_path: &Path,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let started = Instant::now();
        if let Err(e) = self.ensure_connected().await {
            return AgentResponse::failure(e, started.elapsed().as_secs_f64());
        }

        let params = json!({
            "prompt": prompt,
            "prompt_file": prompt_path.display().to_string(),
        });
        match self.request("session/prompt", params, deadline, &cancel).await {
            Ok(result) => {
                let duration_seconds = started.elapsed().as_secs_f64();
                if let Some(error) = result.get("error") {
                    let message = error
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("agent error")
                        .to_string();
                    return AgentResponse::failure(message, duration_seconds);
                }
                let body = result.get("result").unwrap_or(&result);
                AgentResponse {
                    success: true,
                    output: body
                        .get("output")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| body.to_string()),
                    error: String::new(),
                    tokens_in: body.get("tokens_in").and_then(|v| v.as_u64()),
                    tokens_out: body.get("tokens_out").and_then(|v| v.as_u64()),
                    cost: body.get("cost").and_then(|v| v.as_f64()),
                    duration_seconds,
                    exit_code: None,
                }
            }
            Err(e) => {
                // a dead deadline means a wedged agent; reset the child so
                // the next iteration starts clean
                if e == "timeout" {
                    self.teardown().await;
                }
                AgentResponse::failure(e, started.elapsed().as_secs_f64())
            }
        }
    }

    async fn shutdown(&self) {
        self.teardown().await;
    }
}

/// Read the child's stdout line by line, routing responses to their pending
/// requests, answering agent-initiated permission checks, and dispatching
/// notifications.
async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    handlers: HandlerMap,
    outgoing: mpsc::Sender<String>,
    permission_mode: PermissionMode,
    allowed_tools: HashSet<String>,
) {
    let reader = BufReader::new(stdout);
    let mut lines = reader.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => continue,
        };

        let id = message.get("id").and_then(|v| v.as_u64());
        let method = message.get("method").and_then(|v| v.as_str());

        match (id, method) {
            // response to one of our requests
            (Some(id), None) => {
                let sender = pending.lock().ok().and_then(|mut p| p.remove(&id));
                if let Some(sender) = sender {
                    let _ = sender.send(message);
                }
            }
            // agent-initiated request: tool permission check
            (Some(id), Some("session/request_permission")) => {
                let tool = message
                    .get("params")
                    .and_then(|p| p.get("tool"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("");
                let approved =
                    decide_permission(&permission_mode, &allowed_tools, tool).await;
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"approved": approved},
                });
                let _ = outgoing.send(response.to_string()).await;
            }
            // unknown agent-initiated request: refuse rather than stall it
            (Some(id), Some(_)) => {
                let response = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": "method not supported"},
                });
                let _ = outgoing.send(response.to_string()).await;
            }
            // notification
            (None, Some(method)) => {
                if let Ok(handlers) = handlers.lock() {
                    if let Some(handler) = handlers.get(method) {
                        handler(&message);
                    }
                }
            }
            (None, None) => {}
        }
    }
}

async fn decide_permission(
    mode: &PermissionMode,
    allowed_tools: &HashSet<String>,
    tool: &str,
) -> bool {
    match mode {
        PermissionMode::AutoApprove => true,
        PermissionMode::DenyAll => false,
        PermissionMode::Allowlist => allowed_tools.contains(tool),
        PermissionMode::Ask => ask_operator(tool).await,
    }
}

/// Synchronously prompt the operator on the terminal. Anything other than
/// an explicit yes denies, including EOF.
async fn ask_operator(tool: &str) -> bool {
    eprint!("[ralph] agent requests tool '{}' - allow? [y/N] ", tool);
    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => false,
        Ok(_) => {
            let answer = line.trim().to_lowercase();
            answer == "y" || answer == "yes"
        }
    }
}
