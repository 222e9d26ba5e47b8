// Coordination store
//
// The filesystem is the IPC medium between the orchestrator and sub-agent
// processes: prompts are written under coordination/prompts/, the sub-agent
// writes one result JSON under coordination/results/, and the orchestrator
// keeps status snapshots under coordination/status/. Keys are invocation
// ids; values are JSON blobs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestrationError, SupervisorResult};
use crate::utils::time::now_rfc3339;

use super::profiles::SubAgentKind;

/// One result file per sub-agent invocation. The field set is the wire
/// schema; `return_code` is -1 on infrastructure failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationResult {
    pub subagent_type: SubAgentKind,
    pub success: bool,
    pub output: String,
    pub tokens_used: Option<u64>,
    pub error: Option<String>,
    pub return_code: i32,
    pub parsed_json: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub id: String,
    pub subagent_type: SubAgentKind,
    pub state: String, // "spawned" | "collected" | "missing"
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct CoordinationStore {
    prompts_dir: PathBuf,
    results_dir: PathBuf,
    status_dir: PathBuf,
}

impl CoordinationStore {
    pub fn new(prompts_dir: PathBuf, results_dir: PathBuf, status_dir: PathBuf) -> Self {
        Self {
            prompts_dir,
            results_dir,
            status_dir,
        }
    }

    pub fn ensure(&self) -> SupervisorResult<()> {
        std::fs::create_dir_all(&self.prompts_dir)?;
        std::fs::create_dir_all(&self.results_dir)?;
        std::fs::create_dir_all(&self.status_dir)?;
        Ok(())
    }

    pub fn prompt_path(&self, id: &str) -> PathBuf {
        self.prompts_dir.join(format!("{}.md", id))
    }

    pub fn result_path(&self, id: &str) -> PathBuf {
        self.results_dir.join(format!("{}.json", id))
    }

    pub fn write_prompt(&self, id: &str, prompt: &str) -> SupervisorResult<PathBuf> {
        self.ensure()?;
        let path = self.prompt_path(id);
        std::fs::write(&path, prompt)?;
        Ok(path)
    }

    pub fn write_status(&self, id: &str, subagent_type: SubAgentKind, state: &str) -> SupervisorResult<()> {
        self.ensure()?;
        let snapshot = StatusSnapshot {
            id: id.to_string(),
            subagent_type,
            state: state.to_string(),
            updated_at: now_rfc3339(),
        };
        std::fs::write(
            self.status_dir.join(format!("{}.json", id)),
            serde_json::to_string_pretty(&snapshot)?,
        )?;
        Ok(())
    }

    /// Used by in-process callers (tests, the orchestrator's own synthetic
    /// failure records); production results are written by the sub-agent.
    pub fn write_result(&self, id: &str, result: &CoordinationResult) -> SupervisorResult<()> {
        self.ensure()?;
        std::fs::write(
            self.result_path(id),
            serde_json::to_string_pretty(result)?,
        )?;
        Ok(())
    }

    pub fn has_result(&self, id: &str) -> bool {
        self.result_path(id).is_file()
    }

    pub fn read_result(&self, id: &str) -> SupervisorResult<CoordinationResult> {
        let path = self.result_path(id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OrchestrationError::InvalidResult {
                id: id.to_string(),
                message: format!("unreadable {}: {}", path.display(), e),
            }
        })?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestrationError::InvalidResult {
                id: id.to_string(),
                message: format!("bad JSON: {}", e),
            }
            .into()
        })
    }

    /// All collected results, ordered by id for stable aggregation.
    pub fn list_results(&self) -> SupervisorResult<Vec<(String, CoordinationResult)>> {
        let mut results = Vec::new();
        if !self.results_dir.exists() {
            return Ok(results);
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.results_dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        for path in paths {
            let id = id_from_path(&path);
            results.push((id.clone(), self.read_result(&id)?));
        }
        Ok(results)
    }
}

fn id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> CoordinationStore {
        CoordinationStore::new(
            dir.join("prompts"),
            dir.join("results"),
            dir.join("status"),
        )
    }

    fn sample_result() -> CoordinationResult {
        CoordinationResult {
            subagent_type: SubAgentKind::Validator,
            success: true,
            output: "all criteria pass".to_string(),
            tokens_used: Some(321),
            error: None,
            return_code: 0,
            parsed_json: Some(serde_json::json!({"passed": 3})),
        }
    }

    #[test]
    fn test_result_round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let result = sample_result();
        store.write_result("sub-1", &result).unwrap();

        let loaded = store.read_result("sub-1").unwrap();
        assert_eq!(loaded.subagent_type, SubAgentKind::Validator);
        assert_eq!(loaded.success, result.success);
        assert_eq!(loaded.output, result.output);
        assert_eq!(loaded.tokens_used, result.tokens_used);
        assert_eq!(loaded.error, result.error);
        assert_eq!(loaded.return_code, result.return_code);
        assert_eq!(loaded.parsed_json, result.parsed_json);
    }

    #[test]
    fn test_wire_schema_field_names() {
        let json = serde_json::to_value(sample_result()).unwrap();
        for key in [
            "subagent_type",
            "success",
            "output",
            "tokens_used",
            "error",
            "return_code",
            "parsed_json",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(json["subagent_type"], "validator");
    }

    #[test]
    fn test_invalid_result_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure().unwrap();
        std::fs::write(store.result_path("bad"), "not json").unwrap();
        assert!(store.read_result("bad").is_err());
    }

    #[test]
    fn test_list_results_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write_result("b", &sample_result()).unwrap();
        store.write_result("a", &sample_result()).unwrap();
        let results = store.list_results().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
        assert_eq!(results[1].0, "b");
    }

    #[test]
    fn test_status_and_prompt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.write_prompt("sub-1", "do the task").unwrap();
        store
            .write_status("sub-1", SubAgentKind::Implementer, "spawned")
            .unwrap();
        assert!(store.prompt_path("sub-1").is_file());
        let status: StatusSnapshot = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("status/sub-1.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(status.state, "spawned");
    }
}
