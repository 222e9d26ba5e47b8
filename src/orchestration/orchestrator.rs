// Sub-agent orchestrator
//
// For an orchestrated iteration the primary adapter is bypassed: a
// specialist is selected from the prompt, its required tools are verified
// against the environment catalog, and the underlying adapter spawns it
// with a templated prompt. The sub-agent reports back through the
// coordination store; the orchestrator maps its result file onto a normal
// AgentResponse and, at end of run, aggregates all results into a verdict.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::adapters::AgentAdapter;
use crate::error::{OrchestrationError, SupervisorResult};
use crate::metrics::{OrchestrationOutcome, OrchestrationVerdict};
use crate::types::AgentResponse;

use super::coordination::CoordinationStore;
use super::profiles::{extract_criteria, profile, select_kind, SubAgentKind};

/// Default tools assumed present when the environment supplies no catalog.
const DEFAULT_TOOLS: &[&str] = &["shell", "file_read", "file_write", "web_search"];

/// Environment-supplied catalog of tools sub-agents may use.
#[derive(Debug, Clone)]
pub struct ToolCatalog {
    available: HashSet<String>,
    disabled: HashSet<String>,
}

impl ToolCatalog {
    pub fn new(available: impl IntoIterator<Item = String>) -> Self {
        Self {
            available: available.into_iter().collect(),
            disabled: HashSet::new(),
        }
    }

    /// RALPH_AVAILABLE_TOOLS / RALPH_DISABLED_TOOLS, comma-separated.
    pub fn from_env() -> Self {
        let available = match std::env::var("RALPH_AVAILABLE_TOOLS") {
            Ok(list) => split_list(&list),
            Err(_) => DEFAULT_TOOLS.iter().map(|t| t.to_string()).collect(),
        };
        let disabled = std::env::var("RALPH_DISABLED_TOOLS")
            .map(|list| split_list(&list))
            .unwrap_or_default();
        Self {
            available,
            disabled,
        }
    }

    pub fn disable(&mut self, tool: &str) {
        self.disabled.insert(tool.to_string());
    }

    pub fn is_usable(&self, tool: &str) -> bool {
        self.available.contains(tool) && !self.disabled.contains(tool)
    }
}

fn split_list(list: &str) -> HashSet<String> {
    list.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

pub struct SubAgentOrchestrator {
    adapter: Arc<dyn AgentAdapter>,
    store: CoordinationStore,
    catalog: ToolCatalog,
    working_prompt_path: PathBuf,
    max_parallel: usize,
    launched: Vec<String>,
}

impl SubAgentOrchestrator {
    pub fn new(
        adapter: Arc<dyn AgentAdapter>,
        store: CoordinationStore,
        catalog: ToolCatalog,
        working_prompt_path: PathBuf,
        max_parallel: usize,
    ) -> Self {
        Self {
            adapter,
            store,
            catalog,
            working_prompt_path,
            max_parallel: max_parallel.max(1),
            launched: Vec::new(),
        }
    }

    pub fn launched_count(&self) -> usize {
        self.launched.len()
    }

    /// Run one orchestrated iteration: select, verify, spawn, collect.
    pub async fn execute_iteration(
        &mut self,
        prompt: &str,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> SupervisorResult<AgentResponse> {
        let kind = select_kind(prompt);
        let profile = profile(kind);

        // Hard failure before any spawn: every required tool must be usable.
        for tool in profile.required_tools {
            if !self.catalog.is_usable(tool) {
                return Err(OrchestrationError::MissingTool {
                    subagent: kind.as_str().to_string(),
                    tool: tool.to_string(),
                }
                .into());
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let sub_prompt = self.build_prompt(&id, kind, prompt);
        self.store.write_prompt(&id, &sub_prompt)?;
        self.store.write_status(&id, kind, "spawned")?;
        self.launched.push(id.clone());

        let response = self
            .adapter
            .execute(&sub_prompt, &self.working_prompt_path, deadline, cancel)
            .await;

        if !self.store.has_result(&id) {
            self.store.write_status(&id, kind, "missing")?;
            let reason = if response.error.is_empty() {
                "sub-agent wrote no result file".to_string()
            } else {
                response.error.clone()
            };
            return Ok(AgentResponse {
                success: false,
                error: reason,
                ..response
            });
        }

        let result = match self.store.read_result(&id) {
            Ok(result) => result,
            Err(e) => {
                // unparseable structured output counts as an adapter failure
                self.store.write_status(&id, kind, "missing")?;
                return Ok(AgentResponse::failure(
                    format!("parse error: {}", e),
                    response.duration_seconds,
                ));
            }
        };
        self.store.write_status(&id, kind, "collected")?;

        Ok(AgentResponse {
            success: result.success,
            output: result.output,
            error: result.error.unwrap_or_default(),
            tokens_in: None,
            tokens_out: result.tokens_used,
            cost: response.cost,
            duration_seconds: response.duration_seconds,
            exit_code: Some(result.return_code),
        })
    }

    /// Run several prompts as one orchestrated round, bounded by
    /// max_parallel_subagents. With the default of 1 this degenerates to
    /// strictly sequential spawning.
    pub async fn execute_batch(
        &mut self,
        prompts: &[String],
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Vec<SupervisorResult<AgentResponse>> {
        if self.max_parallel <= 1 {
            let mut responses = Vec::with_capacity(prompts.len());
            for prompt in prompts {
                responses.push(
                    self.execute_iteration(prompt, deadline, cancel.clone())
                        .await,
                );
            }
            return responses;
        }

        // Pre-register every spawn, then fan out bounded.
        let jobs: Vec<(String, String)> = prompts
            .iter()
            .map(|p| (uuid::Uuid::new_v4().to_string(), p.clone()))
            .collect();
        for (id, prompt) in &jobs {
            let kind = select_kind(prompt);
            let sub_prompt = self.build_prompt(id, kind, prompt);
            if self.store.write_prompt(id, &sub_prompt).is_ok() {
                let _ = self.store.write_status(id, kind, "spawned");
            }
            self.launched.push(id.clone());
        }

        let adapter = self.adapter.clone();
        let store = self.store.clone();
        let prompt_path = self.working_prompt_path.clone();
        let results: Vec<SupervisorResult<AgentResponse>> = stream::iter(jobs)
            .map(|(id, prompt)| {
                let adapter = adapter.clone();
                let store = store.clone();
                let prompt_path = prompt_path.clone();
                let cancel = cancel.clone();
                async move {
                    let kind = select_kind(&prompt);
                    let sub_prompt = std::fs::read_to_string(store.prompt_path(&id))
                        .unwrap_or(prompt);
                    let response = adapter
                        .execute(&sub_prompt, &prompt_path, deadline, cancel)
                        .await;
                    let outcome = if store.has_result(&id) {
                        let _ = store.write_status(&id, kind, "collected");
                        store.read_result(&id).map(|result| AgentResponse {
                            success: result.success,
                            output: result.output,
                            error: result.error.unwrap_or_default(),
                            tokens_in: None,
                            tokens_out: result.tokens_used,
                            cost: response.cost,
                            duration_seconds: response.duration_seconds,
                            exit_code: Some(result.return_code),
                        })
                    } else {
                        let _ = store.write_status(&id, kind, "missing");
                        Ok(AgentResponse {
                            success: false,
                            error: "sub-agent wrote no result file".to_string(),
                            ..response
                        })
                    };
                    outcome
                }
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;
        results
    }

    /// End-of-run verdict over every collected result.
    pub fn aggregate(&self) -> SupervisorResult<OrchestrationOutcome> {
        let results = self.store.list_results()?;

        let verdict = if results.is_empty() {
            OrchestrationVerdict::NoResults
        } else if results.iter().any(|(_, r)| !r.success) {
            OrchestrationVerdict::Fail
        } else if results.len() < self.launched.len() {
            OrchestrationVerdict::Inconclusive
        } else {
            OrchestrationVerdict::Pass
        };

        let passed = results.iter().filter(|(_, r)| r.success).count();
        let failed = results.len() - passed;
        let summary = format!(
            "{}: {} passed, {} failed ({} launched, {} collected)",
            verdict,
            passed,
            failed,
            self.launched.len(),
            results.len()
        );

        Ok(OrchestrationOutcome {
            verdict,
            summary,
            subagent_results: results.into_iter().map(|(_, r)| r).collect(),
        })
    }

    fn build_prompt(&self, id: &str, kind: SubAgentKind, prompt: &str) -> String {
        let criteria = extract_criteria(prompt);
        let criteria_block = criteria
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "{}\n\n## Acceptance criteria\n{}\n\n## Task\n{}\n\n## Reporting\n\
             When finished, write a single JSON result to {} with the fields \
             subagent_type, success, output, tokens_used, error, return_code, \
             parsed_json. Your subagent_type is \"{}\".\n",
            profile(kind).system_prompt,
            criteria_block,
            prompt,
            self.store.result_path(id).display(),
            kind,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::CoordinationResult;
    use crate::types::AgentKind;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    /// Stub adapter that optionally drops a canned result file keyed by the
    /// result path it finds in the prompt text.
    struct StubAdapter {
        result_body: Option<String>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl AgentAdapter for StubAdapter {
        fn kind(&self) -> AgentKind {
            AgentKind::Claude
        }

        async fn available(&self) -> bool {
            true
        }

        async fn execute(
            &self,
            prompt: &str,
            _prompt_path: &Path,
            _deadline: Duration,
            _cancel: CancellationToken,
        ) -> AgentResponse {
            *self.calls.lock().unwrap() += 1;
            if let Some(body) = &self.result_body {
                // the reporting section names the result path
                if let Some(path) = prompt
                    .lines()
                    .find_map(|l| l.split_whitespace().find(|w| w.ends_with(".json")))
                {
                    let _ = std::fs::write(path, body);
                }
            }
            AgentResponse {
                success: true,
                output: "spawned".to_string(),
                error: String::new(),
                tokens_in: None,
                tokens_out: None,
                cost: None,
                duration_seconds: 0.1,
                exit_code: Some(0),
            }
        }
    }

    fn orchestrator(
        dir: &Path,
        result_body: Option<&str>,
    ) -> SubAgentOrchestrator {
        let store = CoordinationStore::new(
            dir.join("prompts"),
            dir.join("results"),
            dir.join("status"),
        );
        store.ensure().unwrap();
        SubAgentOrchestrator::new(
            Arc::new(StubAdapter {
                result_body: result_body.map(|s| s.to_string()),
                calls: Mutex::new(0),
            }),
            store,
            ToolCatalog::new(DEFAULT_TOOLS.iter().map(|t| t.to_string())),
            dir.join("PROMPT.md"),
            1,
        )
    }

    #[tokio::test]
    async fn test_orchestrated_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(
            dir.path(),
            Some(r#"{"subagent_type":"validator","success":true,"output":"ok","tokens_used":null,"error":null,"return_code":0,"parsed_json":null}"#),
        );
        let response = orch
            .execute_iteration(
                "validate the build output",
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.output, "ok");
        assert_eq!(response.exit_code, Some(0));

        let outcome = orch.aggregate().unwrap();
        assert_eq!(outcome.verdict, OrchestrationVerdict::Pass);
        assert!(outcome.summary.contains("1 passed, 0 failed"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_hard_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), None);
        orch.catalog.disable("shell");
        let err = orch
            .execute_iteration(
                "validate everything",
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shell"));
        // nothing was spawned
        assert_eq!(orch.launched_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_result_file_fails_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), None);
        let response = orch
            .execute_iteration(
                "verify the deploy",
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.error.contains("no result file"));

        let outcome = orch.aggregate().unwrap();
        assert_eq!(outcome.verdict, OrchestrationVerdict::NoResults);
    }

    #[tokio::test]
    async fn test_bad_result_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), Some("{not json"));
        let response = orch
            .execute_iteration(
                "check the output",
                Duration::from_secs(5),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!response.success);
        assert!(response.error.starts_with("parse error"));
    }

    #[tokio::test]
    async fn test_aggregate_fail_beats_inconclusive() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path(), None);
        let mut orch = orch;
        orch.launched.push("ghost".to_string());
        orch.store
            .write_result(
                "real",
                &CoordinationResult {
                    subagent_type: SubAgentKind::Validator,
                    success: false,
                    output: String::new(),
                    tokens_used: None,
                    error: Some("criterion 2 failed".to_string()),
                    return_code: 1,
                    parsed_json: None,
                },
            )
            .unwrap();
        let outcome = orch.aggregate().unwrap();
        assert_eq!(outcome.verdict, OrchestrationVerdict::Fail);
    }

    #[tokio::test]
    async fn test_batch_honors_parallel_knob() {
        let dir = tempfile::tempdir().unwrap();
        let store = CoordinationStore::new(
            dir.path().join("prompts"),
            dir.path().join("results"),
            dir.path().join("status"),
        );
        store.ensure().unwrap();
        let mut orch = SubAgentOrchestrator::new(
            Arc::new(StubAdapter {
                result_body: Some(
                    r#"{"subagent_type":"implementer","success":true,"output":"done","tokens_used":null,"error":null,"return_code":0,"parsed_json":null}"#
                        .to_string(),
                ),
                calls: Mutex::new(0),
            }),
            store,
            ToolCatalog::new(DEFAULT_TOOLS.iter().map(|t| t.to_string())),
            dir.path().join("PROMPT.md"),
            2,
        );
        let prompts = vec![
            "implement the first part".to_string(),
            "implement the second part".to_string(),
        ];
        let responses = orch
            .execute_batch(&prompts, Duration::from_secs(5), CancellationToken::new())
            .await;
        assert_eq!(responses.len(), 2);
        for response in responses {
            assert!(response.unwrap().success);
        }
        assert_eq!(orch.launched_count(), 2);
        assert_eq!(
            orch.aggregate().unwrap().verdict,
            OrchestrationVerdict::Pass
        );
    }

    #[tokio::test]
    async fn test_aggregate_inconclusive_on_missing_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut orch = orchestrator(dir.path(), None);
        orch.launched.push("a".to_string());
        orch.launched.push("b".to_string());
        orch.store
            .write_result(
                "a",
                &CoordinationResult {
                    subagent_type: SubAgentKind::Analyst,
                    success: true,
                    output: "fine".to_string(),
                    tokens_used: None,
                    error: None,
                    return_code: 0,
                    parsed_json: None,
                },
            )
            .unwrap();
        let outcome = orch.aggregate().unwrap();
        assert_eq!(outcome.verdict, OrchestrationVerdict::Inconclusive);
    }
}
