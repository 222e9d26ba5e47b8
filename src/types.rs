// Core shared types for the supervisor
//
// Run state machine, agent kinds, and the per-iteration records that the
// loop, safety guard, and metrics all share.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SupervisorError};

/// States a run moves through, from process start to a terminal verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Config loaded, components being wired up
    Initializing,
    /// Iterations in flight
    Running,
    /// Operator signal received, loop idling
    Paused,
    /// Completion marker observed, wrapping up
    Completing,
    /// Evidence gate in progress
    Validating,
    /// Run finished successfully
    Complete,
    /// A safety limit tripped or the operator cancelled
    Aborted,
    /// Unrecoverable failure (adapter streak, validation exhausted)
    Failed,
}

impl RunState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Aborted | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Initializing => write!(f, "Initializing"),
            RunState::Running => write!(f, "Running"),
            RunState::Paused => write!(f, "Paused"),
            RunState::Completing => write!(f, "Completing"),
            RunState::Validating => write!(f, "Validating"),
            RunState::Complete => write!(f, "Complete"),
            RunState::Aborted => write!(f, "Aborted"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// Valid state transitions
pub fn is_valid_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;

    // Safety abort and operator cancel are legal from any non-terminal state,
    // as is an unrecoverable failure.
    if !from.is_terminal() && matches!(to, Aborted | Failed) {
        return true;
    }

    matches!(
        (from, to),
        (Initializing, Running)
            | (Running, Running)
            | (Running, Completing)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Validating)
            | (Completing, Complete)
            | (Completing, Validating)
            | (Validating, Complete)
            | (Validating, Running) // evidence failed, attempts remain
    )
}

/// Closed set of supported agent adapters.
///
/// `Auto` is only a configuration-time value; it resolves to a concrete
/// kind during initialization and never reaches the loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Auto,
    Claude,
    Gemini,
    QChat,
    Acp,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Auto => "auto",
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
            AgentKind::QChat => "qchat",
            AgentKind::Acp => "acp",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SupervisorError> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(AgentKind::Auto),
            "claude" => Ok(AgentKind::Claude),
            "gemini" => Ok(AgentKind::Gemini),
            "qchat" => Ok(AgentKind::QChat),
            "acp" => Ok(AgentKind::Acp),
            other => Err(ConfigError::InvalidValue {
                key: "agent".to_string(),
                message: format!("unknown agent tag '{}'", other),
            }
            .into()),
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exit outcome of a single adapter invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Success,
    ToolError,
    Timeout,
    Killed,
    ParseError,
}

/// Typed response returned by every agent adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub cost: Option<f64>,
    pub duration_seconds: f64,
    pub exit_code: Option<i32>,
}

impl AgentResponse {
    /// A failure response carrying only an error message. Used for
    /// infrastructure-level failures that never produced agent output.
    pub fn failure(error: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            tokens_in: None,
            tokens_out: None,
            cost: None,
            duration_seconds,
            exit_code: None,
        }
    }

    /// Classify this response into an iteration outcome.
    pub fn outcome(&self) -> IterationOutcome {
        if self.success {
            return IterationOutcome::Success;
        }
        if self.error == "timeout" {
            return IterationOutcome::Timeout;
        }
        if self.error.starts_with("killed") {
            return IterationOutcome::Killed;
        }
        if self.error.starts_with("parse error") {
            return IterationOutcome::ParseError;
        }
        IterationOutcome::ToolError
    }
}

/// One record per iteration, appended strictly in iteration-number order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationStats {
    pub sequence: u32,
    pub started_at: String,
    pub ended_at: String,
    pub agent: AgentKind,
    pub outcome: IterationOutcome,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub cost: Option<f64>,
    pub duration_seconds: f64,
    pub suspected_loop: bool,
    pub trigger_reason: Option<String>,
}
