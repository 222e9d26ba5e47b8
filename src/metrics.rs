// Run metrics
//
// One metrics JSON is written per run under .agent/metrics/. Struct field
// order is the serialization order, so loading and re-serializing a metrics
// file is byte-stable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cost_tracker::CostSummary;
use crate::error::SupervisorResult;
use crate::types::{AgentKind, IterationStats, RunState};
use crate::utils::time::timestamp_slug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub agent: AgentKind,
    pub state: RunState,
    pub iterations_recorded: u32,
    pub started_at: String,
    pub ended_at: String,
    pub duration_seconds: f64,
    pub abort_reason: Option<String>,
    pub cost: CostSummary,
}

/// Verdict over all sub-agent results collected during an orchestrated run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationVerdict {
    Pass,
    Fail,
    Inconclusive,
    NoResults,
}

impl std::fmt::Display for OrchestrationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationVerdict::Pass => write!(f, "PASS"),
            OrchestrationVerdict::Fail => write!(f, "FAIL"),
            OrchestrationVerdict::Inconclusive => write!(f, "INCONCLUSIVE"),
            OrchestrationVerdict::NoResults => write!(f, "NO_RESULTS"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationOutcome {
    pub verdict: OrchestrationVerdict,
    pub summary: String,
    pub subagent_results: Vec<crate::orchestration::CoordinationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationMetrics {
    pub enabled: bool,
    pub results: Option<OrchestrationOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub summary: RunSummary,
    pub iterations: Vec<IterationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationMetrics>,
}

impl RunMetrics {
    /// Write to metrics_<YYYYMMDD_HHMMSS>.json and return the path.
    pub fn write(&self, metrics_dir: &Path) -> SupervisorResult<PathBuf> {
        std::fs::create_dir_all(metrics_dir)?;
        let path = metrics_dir.join(format!("metrics_{}.json", timestamp_slug()));
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> SupervisorResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
