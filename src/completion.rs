// Completion marker detection
//
// Decides whether the prompt document carries the completion sentinel. The
// strict form only matches the marker inside a ticked checkbox on its own
// line, so sentinel text quoted in template examples does not end the run.

use regex::Regex;

use crate::error::{ConfigError, SupervisorResult};

pub const DEFAULT_MARKER: &str = "TASK_COMPLETE";

pub struct CompletionDetector {
    marker: String,
    checkbox_pattern: Option<Regex>,
}

impl CompletionDetector {
    /// `require_checkbox` selects the strict `- [x] MARKER` form; when off,
    /// any occurrence of the marker anywhere in the document counts.
    pub fn new(marker: &str, require_checkbox: bool) -> SupervisorResult<Self> {
        if marker.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "completion_marker".to_string(),
                message: "must not be empty".to_string(),
            }
            .into());
        }
        let checkbox_pattern = if require_checkbox {
            let pattern = format!(
                r"(?m)^\s*[-*]\s*\[[xX]\]\s*.*{}",
                regex::escape(marker)
            );
            Some(Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
                key: "completion_marker".to_string(),
                message: format!("cannot build marker pattern: {}", e),
            })?)
        } else {
            None
        };
        Ok(Self {
            marker: marker.to_string(),
            checkbox_pattern,
        })
    }

    /// Pure check over the prompt text.
    pub fn check(&self, prompt_text: &str) -> bool {
        if prompt_text.len() < self.marker.len() {
            return false;
        }
        match &self.checkbox_pattern {
            Some(pattern) => pattern.is_match(prompt_text),
            None => prompt_text.contains(&self.marker),
        }
    }
}
