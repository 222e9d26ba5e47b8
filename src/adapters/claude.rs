// Claude CLI adapter
//
// Invokes the Claude Code CLI in print mode with JSON output and parses the
// result envelope for token counts and the reported cost.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::exec::{binary_on_path, run_with_deadline, CommandSpec, ExecLimits};
use super::{AdapterSettings, AgentAdapter};
use crate::types::{AgentKind, AgentResponse};

/// Environment variables excluded from the child when RALPH_API_KEY_MODE is
/// "blocked" (the default). This keeps the CLI on its own OAuth credentials
/// instead of picking up a raw API key from the supervisor's environment.
const SENSITIVE_ENV_VARS: &[&str] = &["ANTHROPIC_API_KEY"];

pub struct ClaudeAdapter {
    settings: AdapterSettings,
}

impl ClaudeAdapter {
    pub fn new(settings: AdapterSettings) -> Self {
        Self { settings }
    }

    fn binary(&self) -> String {
        std::env::var("RALPH_CLAUDE_PATH")
            .ok()
            .or_else(find_claude_cli)
            .unwrap_or_else(|| "claude".to_string())
    }

    fn env_remove(&self) -> Vec<String> {
        let mode = std::env::var("RALPH_API_KEY_MODE").unwrap_or_else(|_| "blocked".to_string());
        if mode.eq_ignore_ascii_case("blocked") {
            SENSITIVE_ENV_VARS.iter().map(|v| v.to_string()).collect()
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    async fn available(&self) -> bool {
        let binary = self.binary();
        binary_on_path(&binary) || Path::new(&binary).is_file()
    }

    async fn execute(
        &self,
        prompt: &str,
        _prompt_path: &Path,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let spec = CommandSpec {
            program: self.binary(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
                "--permission-mode".to_string(),
                "bypassPermissions".to_string(),
                prompt.to_string(),
            ],
            working_dir: Some(self.settings.working_dir.clone()),
            env_remove: self.env_remove(),
        };
        let limits = ExecLimits {
            deadline,
            grace: self.settings.grace,
            max_output_bytes: self.settings.max_output_bytes,
        };
        let mut response = run_with_deadline(spec, &limits, &cancel).await;
        enrich_from_result_json(&mut response);
        response
    }
}

/// Pull tokens, cost, and the result text out of the CLI's JSON output.
/// Handles both the single `--output-format json` envelope and stream-json
/// captures, where the result envelope is the last `"type":"result"` line.
/// Unparseable output is left as-is; the raw capture is still useful.
fn enrich_from_result_json(response: &mut AgentResponse) {
    let json = match find_result_envelope(&response.output) {
        Some(json) => json,
        None => return,
    };

    if let Some(cost) = json.get("total_cost_usd").and_then(|v| v.as_f64()) {
        response.cost = Some(cost);
    }
    if let Some(usage) = json.get("usage") {
        response.tokens_in = usage.get("input_tokens").and_then(|v| v.as_u64());
        response.tokens_out = usage.get("output_tokens").and_then(|v| v.as_u64());
    }
    if let Some(result) = json.get("result").and_then(|v| v.as_str()) {
        response.output = result.to_string();
    }
    if json.get("is_error").and_then(|v| v.as_bool()) == Some(true) && response.error.is_empty() {
        response.success = false;
        response.error = "agent reported is_error=true".to_string();
    }
}

fn find_result_envelope(output: &str) -> Option<serde_json::Value> {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(output.trim()) {
        return Some(json);
    }
    // stream-json: one JSON message per line, result last
    output
        .lines()
        .rev()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
        .find(|json| json.get("type").and_then(|t| t.as_str()) == Some("result"))
}

/// Attempt to find the Claude CLI in common installation locations
fn find_claude_cli() -> Option<String> {
    if let Ok(home) = std::env::var("HOME") {
        // ~/.local/bin (common for user installs)
        let local_bin = PathBuf::from(&home).join(".local/bin/claude");
        if local_bin.exists() {
            return Some(local_bin.to_string_lossy().to_string());
        }

        // nvm locations (any installed node version)
        let nvm_dir = PathBuf::from(&home).join(".nvm/versions/node");
        if let Ok(entries) = std::fs::read_dir(&nvm_dir) {
            for entry in entries.flatten() {
                let claude_path = entry.path().join("bin/claude");
                if claude_path.exists() {
                    return Some(claude_path.to_string_lossy().to_string());
                }
            }
        }
    }

    let usr_local = PathBuf::from("/usr/local/bin/claude");
    if usr_local.exists() {
        return Some(usr_local.to_string_lossy().to_string());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_response(output: &str) -> AgentResponse {
        AgentResponse {
            success: true,
            output: output.to_string(),
            error: String::new(),
            tokens_in: None,
            tokens_out: None,
            cost: None,
            duration_seconds: 1.0,
            exit_code: Some(0),
        }
    }

    #[test]
    fn test_enrich_parses_result_envelope() {
        let mut response = base_response(
            r#"{"result": "did the thing", "total_cost_usd": 0.12,
                "usage": {"input_tokens": 900, "output_tokens": 450}}"#,
        );
        enrich_from_result_json(&mut response);
        assert_eq!(response.output, "did the thing");
        assert_eq!(response.cost, Some(0.12));
        assert_eq!(response.tokens_in, Some(900));
        assert_eq!(response.tokens_out, Some(450));
        assert!(response.success);
    }

    #[test]
    fn test_enrich_flags_is_error() {
        let mut response = base_response(r#"{"result": "oops", "is_error": true}"#);
        enrich_from_result_json(&mut response);
        assert!(!response.success);
        assert!(response.error.contains("is_error"));
    }

    #[test]
    fn test_enrich_leaves_plain_output_alone() {
        let mut response = base_response("not json at all");
        enrich_from_result_json(&mut response);
        assert_eq!(response.output, "not json at all");
        assert!(response.success);
        assert_eq!(response.cost, None);
    }

    #[test]
    fn test_enrich_finds_result_line_in_stream_json() {
        let mut response = base_response(concat!(
            r#"{"type":"system","session_id":"abc"}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"working"}}"#,
            "\n",
            r#"{"type":"result","result":"finished","total_cost_usd":0.07,"usage":{"input_tokens":40,"output_tokens":20}}"#,
            "\n",
        ));
        enrich_from_result_json(&mut response);
        assert_eq!(response.output, "finished");
        assert_eq!(response.cost, Some(0.07));
        assert_eq!(response.tokens_in, Some(40));
        assert_eq!(response.tokens_out, Some(20));
    }
}
