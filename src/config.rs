// Run configuration
//
// The configuration is an enumerated record: every key is declared here and
// unknown keys in the config file are a hard error, never silently ignored.
// Environment variables with the RALPH_ prefix override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SupervisorResult};
use crate::types::AgentKind;

pub const ENV_PREFIX: &str = "RALPH_";

/// Default stdout/stderr capture cap per invocation (10 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Permission policy for tool calls initiated by an ACP agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    AutoApprove,
    Ask,
    DenyAll,
    Allowlist,
}

/// ACP adapter settings (`acp` key).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AcpConfig {
    /// Command that starts the ACP agent child process
    pub command: String,
    pub permission_mode: PermissionMode,
    /// Tool names granted when permission_mode is "allowlist"
    pub allowed_tools: Vec<String>,
}

impl Default for AcpConfig {
    fn default() -> Self {
        Self {
            command: "acp-agent".to_string(),
            permission_mode: PermissionMode::Ask,
            allowed_tools: Vec::new(),
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RalphConfig {
    /// Primary adapter tag; "auto" resolves to a concrete kind at init
    pub agent: AgentKind,
    /// Path to the prompt document, relative to the run directory
    pub prompt_file: PathBuf,
    pub max_iterations: u32,
    pub max_runtime_seconds: u64,
    /// Cumulative USD cost cap
    pub max_cost: f64,
    pub max_consecutive_failures: u32,
    /// 0.0-1.0 similarity score above which two outputs count as repeats
    pub loop_similarity_threshold: f64,
    /// Number of similar prior outputs required to trip loop detection
    pub loop_detection_k: usize,
    /// How many prior outputs are compared against the latest one
    pub loop_detection_window: usize,
    pub inter_iteration_sleep_seconds: u64,
    /// K for prompt checkpoint rotation
    pub checkpoint_depth: usize,
    pub enable_orchestration: bool,
    pub enable_validation: bool,
    /// Sentinel string whose appearance in the prompt marks the task done
    pub completion_marker: String,
    /// Require the marker inside a `- [x]` checkbox line (strict form)
    pub completion_require_checkbox: bool,
    /// Default per-invocation deadline; 0 derives one from remaining runtime
    pub adapter_timeout_seconds: u64,
    pub max_output_bytes: usize,
    pub max_parallel_subagents: usize,
    /// Validating-state retries before declaring Failed
    pub validation_max_retries: u32,
    pub fail_on_empty_evidence: bool,
    pub evidence_dir: PathBuf,
    /// Optional external snapshot command run at checkpoint cadence;
    /// its failures never affect run state
    pub vcs_snapshot_command: Option<String>,
    /// Grace window between terminate and force-kill of a child
    pub cancel_grace_seconds: u64,
    pub acp: AcpConfig,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            agent: AgentKind::Auto,
            prompt_file: PathBuf::from("PROMPT.md"),
            max_iterations: 100,
            max_runtime_seconds: 4 * 3600,
            max_cost: 50.0,
            max_consecutive_failures: 3,
            loop_similarity_threshold: 0.9,
            loop_detection_k: 3,
            loop_detection_window: 5,
            inter_iteration_sleep_seconds: 0,
            checkpoint_depth: 3,
            enable_orchestration: false,
            enable_validation: false,
            completion_marker: "TASK_COMPLETE".to_string(),
            completion_require_checkbox: true,
            adapter_timeout_seconds: 300,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_parallel_subagents: 1,
            validation_max_retries: 2,
            fail_on_empty_evidence: true,
            evidence_dir: PathBuf::from("validation-evidence"),
            vcs_snapshot_command: None,
            cancel_grace_seconds: 5,
            acp: AcpConfig::default(),
        }
    }
}

impl RalphConfig {
    /// Load a config file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> SupervisorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileError(format!("{}: {}", path.display(), e))
        })?;
        let mut config: RalphConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file.
    pub fn from_env() -> SupervisorResult<Self> {
        let mut config = RalphConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply RALPH_-prefixed environment variables over the current values.
    pub fn apply_env_overrides(&mut self) -> SupervisorResult<()> {
        if let Some(v) = env_var("AGENT") {
            self.agent = AgentKind::parse(&v)?;
        }
        if let Some(v) = env_var("PROMPT_FILE") {
            self.prompt_file = PathBuf::from(v);
        }
        parse_env("MAX_ITERATIONS", &mut self.max_iterations)?;
        parse_env("MAX_RUNTIME_SECONDS", &mut self.max_runtime_seconds)?;
        parse_env("MAX_COST", &mut self.max_cost)?;
        parse_env("MAX_CONSECUTIVE_FAILURES", &mut self.max_consecutive_failures)?;
        parse_env("LOOP_SIMILARITY_THRESHOLD", &mut self.loop_similarity_threshold)?;
        parse_env("LOOP_DETECTION_K", &mut self.loop_detection_k)?;
        parse_env("LOOP_DETECTION_WINDOW", &mut self.loop_detection_window)?;
        parse_env(
            "INTER_ITERATION_SLEEP_SECONDS",
            &mut self.inter_iteration_sleep_seconds,
        )?;
        parse_env("CHECKPOINT_DEPTH", &mut self.checkpoint_depth)?;
        parse_env("ENABLE_ORCHESTRATION", &mut self.enable_orchestration)?;
        parse_env("ENABLE_VALIDATION", &mut self.enable_validation)?;
        if let Some(v) = env_var("COMPLETION_MARKER") {
            self.completion_marker = v;
        }
        parse_env("COMPLETION_REQUIRE_CHECKBOX", &mut self.completion_require_checkbox)?;
        parse_env("ADAPTER_TIMEOUT_SECONDS", &mut self.adapter_timeout_seconds)?;
        parse_env("MAX_OUTPUT_BYTES", &mut self.max_output_bytes)?;
        parse_env("MAX_PARALLEL_SUBAGENTS", &mut self.max_parallel_subagents)?;
        parse_env("VALIDATION_MAX_RETRIES", &mut self.validation_max_retries)?;
        parse_env("FAIL_ON_EMPTY_EVIDENCE", &mut self.fail_on_empty_evidence)?;
        if let Some(v) = env_var("EVIDENCE_DIR") {
            self.evidence_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("VCS_SNAPSHOT_COMMAND") {
            self.vcs_snapshot_command = if v.is_empty() { None } else { Some(v) };
        }
        parse_env("CANCEL_GRACE_SECONDS", &mut self.cancel_grace_seconds)?;
        if let Some(v) = env_var("ACP_COMMAND") {
            self.acp.command = v;
        }
        if let Some(v) = env_var("ACP_PERMISSION_MODE") {
            self.acp.permission_mode = match v.as_str() {
                "auto-approve" => PermissionMode::AutoApprove,
                "ask" => PermissionMode::Ask,
                "deny-all" => PermissionMode::DenyAll,
                "allowlist" => PermissionMode::Allowlist,
                other => {
                    return Err(ConfigError::BadEnvOverride {
                        var: format!("{}ACP_PERMISSION_MODE", ENV_PREFIX),
                        message: format!("unknown mode '{}'", other),
                    }
                    .into())
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> SupervisorResult<()> {
        if !(0.0..=1.0).contains(&self.loop_similarity_threshold) {
            return Err(invalid(
                "loop_similarity_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.max_cost < 0.0 {
            return Err(invalid("max_cost", "must be non-negative"));
        }
        if self.loop_detection_k == 0 {
            return Err(invalid("loop_detection_k", "must be at least 1"));
        }
        if self.loop_detection_window == 0 {
            return Err(invalid("loop_detection_window", "must be at least 1"));
        }
        if self.checkpoint_depth == 0 {
            return Err(invalid("checkpoint_depth", "must be at least 1"));
        }
        if self.max_output_bytes == 0 {
            return Err(invalid("max_output_bytes", "must be positive"));
        }
        if self.max_parallel_subagents == 0 {
            return Err(invalid("max_parallel_subagents", "must be at least 1"));
        }
        if self.prompt_file.as_os_str().is_empty() {
            return Err(invalid("prompt_file", "must not be empty"));
        }
        Ok(())
    }

    /// Per-invocation deadline in seconds. A configured value of 0 means
    /// "derive from the remaining runtime budget"; no invocation ever runs
    /// without an explicit deadline.
    pub fn adapter_deadline_seconds(&self, elapsed_seconds: u64) -> u64 {
        if self.adapter_timeout_seconds > 0 {
            return self.adapter_timeout_seconds;
        }
        self.max_runtime_seconds.saturating_sub(elapsed_seconds).max(1)
    }

    /// Per-sub-agent deadline: an even share of the runtime budget across
    /// the iteration budget.
    pub fn subagent_deadline_seconds(&self, elapsed_seconds: u64) -> u64 {
        if self.max_iterations == 0 {
            return self.adapter_deadline_seconds(elapsed_seconds);
        }
        (self.max_runtime_seconds / self.max_iterations as u64).max(1)
    }
}

fn invalid(key: &str, message: &str) -> crate::error::SupervisorError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn parse_env<T: std::str::FromStr>(
    suffix: &str,
    slot: &mut T,
) -> SupervisorResult<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(v) = env_var(suffix) {
        *slot = v.parse::<T>().map_err(|e| ConfigError::BadEnvOverride {
            var: format!("{}{}", ENV_PREFIX, suffix),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RalphConfig::default();
        assert_eq!(config.agent, AgentKind::Auto);
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.loop_detection_k, 3);
        assert_eq!(config.checkpoint_depth, 3);
        assert_eq!(config.max_output_bytes, 10 * 1024 * 1024);
        assert!(config.fail_on_empty_evidence);
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_key_is_hard_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_iterations": 5, "max_iters": 5}}"#).unwrap();
        let err = RalphConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_iters"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"agent": "claude", "max_iterations": 3, "completion_marker": "DONE"}}"#
        )
        .unwrap();
        let config = RalphConfig::load(file.path()).unwrap();
        assert_eq!(config.agent, AgentKind::Claude);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.completion_marker, "DONE");
        // untouched keys keep their defaults
        assert_eq!(config.loop_detection_window, 5);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = RalphConfig {
            loop_similarity_threshold: 1.5,
            ..RalphConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deadline_derivation() {
        let config = RalphConfig {
            adapter_timeout_seconds: 0,
            max_runtime_seconds: 600,
            ..RalphConfig::default()
        };
        assert_eq!(config.adapter_deadline_seconds(0), 600);
        assert_eq!(config.adapter_deadline_seconds(599), 1);
        // never zero, even past the budget
        assert_eq!(config.adapter_deadline_seconds(10_000), 1);

        let fixed = RalphConfig::default();
        assert_eq!(fixed.adapter_deadline_seconds(0), 300);
    }

    #[test]
    fn test_subagent_deadline_is_budget_share() {
        let config = RalphConfig {
            max_runtime_seconds: 1000,
            max_iterations: 20,
            ..RalphConfig::default()
        };
        assert_eq!(config.subagent_deadline_seconds(0), 50);
    }
}
