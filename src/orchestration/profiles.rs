// Sub-agent profiles and selection
//
// Five specialist types, each with a static system-prompt template and the
// external tools it needs. Selection is a deterministic keyword-priority
// match over the prompt text: the first bucket with a hit wins, so the same
// prompt always routes to the same specialist.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubAgentKind {
    Validator,
    Researcher,
    Implementer,
    Analyst,
    Debugger,
}

impl SubAgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubAgentKind::Validator => "validator",
            SubAgentKind::Researcher => "researcher",
            SubAgentKind::Implementer => "implementer",
            SubAgentKind::Analyst => "analyst",
            SubAgentKind::Debugger => "debugger",
        }
    }
}

impl std::fmt::Display for SubAgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct SubAgentProfile {
    pub kind: SubAgentKind,
    pub system_prompt: &'static str,
    pub required_tools: &'static [&'static str],
}

const VALIDATOR_PROMPT: &str = "\
You are a validation specialist. Verify that the work described below \
actually holds: run the checks, exercise the acceptance criteria, and \
report pass/fail per criterion with evidence.";

const RESEARCHER_PROMPT: &str = "\
You are a research specialist. Investigate the question below, consult the \
available sources, and report findings with references. Do not modify any \
files.";

const IMPLEMENTER_PROMPT: &str = "\
You are an implementation specialist. Carry out the task below, keeping \
changes minimal and consistent with the surrounding code.";

const ANALYST_PROMPT: &str = "\
You are an analysis specialist. Examine the subject below and produce a \
structured assessment: findings first, then supporting detail.";

const DEBUGGER_PROMPT: &str = "\
You are a debugging specialist. Reproduce the problem described below, \
isolate the root cause, apply the smallest fix that resolves it, and show \
the failing case passing.";

/// Keyword buckets in priority order; first match wins, case-insensitive.
const SELECTION_RULES: &[(SubAgentKind, &[&str])] = &[
    (
        SubAgentKind::Debugger,
        &["debug", "fix bug", "troubleshoot", "diagnose", "error"],
    ),
    (
        SubAgentKind::Validator,
        &["validate", "verify", "test", "check", "confirm", "assert"],
    ),
    (
        SubAgentKind::Researcher,
        &["research", "find", "search", "explore", "discover", "investigate"],
    ),
    (
        SubAgentKind::Analyst,
        &["analyze", "review", "assess", "audit", "examine", "evaluate"],
    ),
];

pub fn profile(kind: SubAgentKind) -> SubAgentProfile {
    match kind {
        SubAgentKind::Validator => SubAgentProfile {
            kind,
            system_prompt: VALIDATOR_PROMPT,
            required_tools: &["shell", "file_read"],
        },
        SubAgentKind::Researcher => SubAgentProfile {
            kind,
            system_prompt: RESEARCHER_PROMPT,
            required_tools: &["file_read", "web_search"],
        },
        SubAgentKind::Implementer => SubAgentProfile {
            kind,
            system_prompt: IMPLEMENTER_PROMPT,
            required_tools: &["shell", "file_read", "file_write"],
        },
        SubAgentKind::Analyst => SubAgentProfile {
            kind,
            system_prompt: ANALYST_PROMPT,
            required_tools: &["file_read"],
        },
        SubAgentKind::Debugger => SubAgentProfile {
            kind,
            system_prompt: DEBUGGER_PROMPT,
            required_tools: &["shell", "file_read", "file_write"],
        },
    }
}

/// Pick the specialist for a prompt. Defaults to implementer.
pub fn select_kind(prompt: &str) -> SubAgentKind {
    let lower = prompt.to_lowercase();
    for (kind, keywords) in SELECTION_RULES {
        if keywords.iter().any(|keyword| lower.contains(keyword)) {
            return *kind;
        }
    }
    SubAgentKind::Implementer
}

const MAX_CRITERIA: usize = 10;
const DEFAULT_CRITERION: &str = "Execute the task as specified in the prompt";

/// Extract acceptance criteria from the prompt: unchecked checkbox items
/// first, then sentences carrying must/should/shall, capped at 10. A prompt
/// with neither gets the default criterion.
pub fn extract_criteria(prompt: &str) -> Vec<String> {
    let mut criteria = Vec::new();

    let checkbox = Regex::new(r"(?m)^\s*[-*]?\s*\[ \]\s*(.+)$").unwrap();
    for capture in checkbox.captures_iter(prompt) {
        if criteria.len() >= MAX_CRITERIA {
            break;
        }
        criteria.push(capture[1].trim().to_string());
    }

    if criteria.len() < MAX_CRITERIA {
        for sentence in prompt.split(['.', '\n']) {
            if criteria.len() >= MAX_CRITERIA {
                break;
            }
            let lower = sentence.to_lowercase();
            if lower.contains("must ") || lower.contains("should ") || lower.contains("shall ") {
                let trimmed = sentence.trim();
                if !trimmed.is_empty() && !criteria.iter().any(|c| c == trimmed) {
                    criteria.push(trimmed.to_string());
                }
            }
        }
    }

    if criteria.is_empty() {
        criteria.push(DEFAULT_CRITERION.to_string());
    }
    criteria
}
