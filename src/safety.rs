// Safety guard
//
// Quantitative guardrails evaluated before every iteration. Rules are
// checked in a fixed order and the first match wins, so identical inputs
// always trip the same rule.

use serde::{Deserialize, Serialize};

use crate::config::RalphConfig;

pub const REASON_ITERATION_LIMIT: &str = "iteration_limit";
pub const REASON_RUNTIME_LIMIT: &str = "runtime_limit";
pub const REASON_COST_LIMIT: &str = "cost_limit";
pub const REASON_FAILURE_STREAK: &str = "failure_streak";
pub const REASON_REPETITION_LOOP: &str = "repetition_loop";
pub const REASON_OPERATOR_CANCEL: &str = "operator_cancel";

/// Shingle width for the token-level Jaccard score.
const SHINGLE_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GuardAction {
    Continue,
    Pause,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardDecision {
    pub action: GuardAction,
    pub reason: Option<String>,
}

impl GuardDecision {
    fn proceed() -> Self {
        Self {
            action: GuardAction::Continue,
            reason: None,
        }
    }

    fn abort(reason: &str) -> Self {
        Self {
            action: GuardAction::Abort,
            reason: Some(reason.to_string()),
        }
    }
}

/// Immutable view of the run handed to the guard each iteration.
#[derive(Debug, Clone)]
pub struct GuardSnapshot {
    pub iteration: u32,
    pub elapsed_seconds: f64,
    pub cost: f64,
    pub consecutive_failures: u32,
    pub last_output: Option<String>,
    /// Outputs of the iterations before the last one, newest first,
    /// already bounded to the detection window.
    pub prior_outputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SafetyLimits {
    pub max_iterations: u32,
    pub max_runtime_seconds: u64,
    pub max_cost: f64,
    pub max_consecutive_failures: u32,
    pub similarity_threshold: f64,
    pub loop_detection_k: usize,
}

impl SafetyLimits {
    pub fn from_config(config: &RalphConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_runtime_seconds: config.max_runtime_seconds,
            max_cost: config.max_cost,
            max_consecutive_failures: config.max_consecutive_failures,
            similarity_threshold: config.loop_similarity_threshold,
            loop_detection_k: config.loop_detection_k,
        }
    }
}

pub struct SafetyGuard {
    limits: SafetyLimits,
}

impl SafetyGuard {
    pub fn new(limits: SafetyLimits) -> Self {
        Self { limits }
    }

    /// Evaluate all rules in order; first match wins.
    pub fn evaluate(&self, snapshot: &GuardSnapshot) -> GuardDecision {
        if snapshot.iteration >= self.limits.max_iterations {
            return GuardDecision::abort(REASON_ITERATION_LIMIT);
        }
        if snapshot.elapsed_seconds >= self.limits.max_runtime_seconds as f64 {
            return GuardDecision::abort(REASON_RUNTIME_LIMIT);
        }
        // a zero-cost run has not crossed any ceiling yet, even a zero one
        if snapshot.cost >= self.limits.max_cost && snapshot.cost > 0.0 {
            return GuardDecision::abort(REASON_COST_LIMIT);
        }
        if snapshot.consecutive_failures >= self.limits.max_consecutive_failures {
            return GuardDecision::abort(REASON_FAILURE_STREAK);
        }
        if self.repetition_tripped(snapshot) {
            return GuardDecision::abort(REASON_REPETITION_LOOP);
        }
        GuardDecision::proceed()
    }

    /// Count how many prior outputs score above the similarity threshold
    /// against the latest output.
    fn repetition_tripped(&self, snapshot: &GuardSnapshot) -> bool {
        let last = match &snapshot.last_output {
            Some(last) if !last.is_empty() => last,
            _ => return false,
        };
        let similar = snapshot
            .prior_outputs
            .iter()
            .filter(|prior| similarity(last, prior) >= self.limits.similarity_threshold)
            .count();
        similar >= self.limits.loop_detection_k
    }
}

/// Similarity score in [0, 1] between two agent outputs: the better of a
/// token-shingle Jaccard and a normalized Levenshtein ratio. The shingle
/// score is robust to reordering, the edit ratio to small local changes.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    shingle_jaccard(a, b).max(strsim::normalized_levenshtein(a, b))
}

fn shingle_jaccard(a: &str, b: &str) -> f64 {
    let shingles_a = shingles(a);
    let shingles_b = shingles(b);
    if shingles_a.is_empty() && shingles_b.is_empty() {
        // both shorter than one shingle; fall back to exact comparison
        return if a == b { 1.0 } else { 0.0 };
    }
    if shingles_a.is_empty() || shingles_b.is_empty() {
        return 0.0;
    }
    let intersection = shingles_a.intersection(&shingles_b).count();
    let union = shingles_a.union(&shingles_b).count();
    intersection as f64 / union as f64
}

fn shingles(text: &str) -> std::collections::HashSet<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < SHINGLE_WIDTH {
        return std::collections::HashSet::new();
    }
    tokens
        .windows(SHINGLE_WIDTH)
        .map(|w| w.join(" "))
        .collect()
}
