// Evidence validation gate
//
// Inspects the validation-evidence tree before a run is allowed to finish
// as Complete. JSON artifacts are parsed and checked for error-shaped
// content; text artifacts are scanned for error tokens. The gate fails
// closed: anything that looks like an error keeps the run from completing.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::utils::string::truncate_with_ellipsis;

/// Default tokens that mark a text artifact as failed.
pub const DEFAULT_ERROR_TOKENS: &[&str] = &[
    "ERROR",
    "CRITICAL",
    "BLOCKED",
    "IMPORTANT",
    "FAILED",
    "Exception",
    "timeout",
];

/// Keys whose presence alongside `success: false` still counts as a result.
const POSITIVE_RESULT_KEYS: &[&str] = &["result", "output", "data", "details", "passed"];

const EXCERPT_MAX_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }

    /// Compose two reports: logical AND over success, concatenated messages.
    pub fn merge(mut self, other: ValidationReport) -> Self {
        self.success = self.success && other.success;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self
    }
}

pub struct EvidenceValidator {
    evidence_dir: PathBuf,
    error_tokens: Vec<String>,
    fail_on_empty: bool,
    max_depth: usize,
}

impl EvidenceValidator {
    pub fn new(evidence_dir: PathBuf, fail_on_empty: bool) -> Self {
        Self {
            evidence_dir,
            error_tokens: DEFAULT_ERROR_TOKENS.iter().map(|t| t.to_string()).collect(),
            fail_on_empty,
            max_depth: 2,
        }
    }

    pub fn with_error_tokens(mut self, tokens: Vec<String>) -> Self {
        self.error_tokens = tokens;
        self
    }

    pub fn check(&self) -> ValidationReport {
        if !self.evidence_dir.exists() {
            return ValidationReport::failed(format!(
                "no_evidence: {}",
                self.evidence_dir.display()
            ));
        }

        let mut files = Vec::new();
        collect_files(&self.evidence_dir, self.max_depth, &mut files);

        if files.is_empty() {
            if self.fail_on_empty {
                return ValidationReport::failed(format!(
                    "evidence directory is empty: {}",
                    self.evidence_dir.display()
                ));
            }
            let mut report = ValidationReport::passed();
            report.warnings.push(format!(
                "evidence directory is empty: {}",
                self.evidence_dir.display()
            ));
            return report;
        }

        let mut report = ValidationReport::passed();
        for file in files {
            report = report.merge(self.check_file(&file));
        }
        report
    }

    fn check_file(&self, path: &Path) -> ValidationReport {
        let name = path
            .strip_prefix(&self.evidence_dir)
            .unwrap_or(path)
            .display()
            .to_string();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return ValidationReport::failed(format!("{}: unreadable: {}", name, e));
            }
        };

        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            match serde_json::from_str::<Value>(&content) {
                Ok(value) => check_json(&name, &value),
                Err(e) => ValidationReport::failed(format!("{}: invalid JSON: {}", name, e)),
            }
        } else {
            self.check_text(&name, &content)
        }
    }

    fn check_text(&self, name: &str, content: &str) -> ValidationReport {
        let mut report = ValidationReport::passed();
        let lower = content.to_lowercase();
        for token in &self.error_tokens {
            if let Some(pos) = lower.find(&token.to_lowercase()) {
                // lowercasing can shift byte offsets; fall back to the
                // lowered text if pos is not a boundary in the original
                let matched = content.get(pos..).unwrap_or(&lower[pos..]);
                let excerpt = truncate_with_ellipsis(matched, EXCERPT_MAX_CHARS);
                report = report.merge(ValidationReport::failed(format!(
                    "{}: token '{}': {}",
                    name,
                    token,
                    crate::utils::string::single_line(&excerpt)
                )));
            }
        }
        report
    }
}

fn check_json(name: &str, value: &Value) -> ValidationReport {
    let object = match value {
        Value::Null => {
            return ValidationReport::failed(format!("{}: top-level is null", name));
        }
        Value::Object(map) if map.is_empty() => {
            return ValidationReport::failed(format!("{}: top-level object is empty", name));
        }
        Value::Object(map) => map,
        // arrays/scalars carry no error shape to inspect
        _ => return ValidationReport::passed(),
    };

    if let Some(error) = object.get("error").and_then(|v| v.as_str()) {
        if !error.is_empty() {
            return ValidationReport::failed(format!("{}: error='{}'", name, error));
        }
    }
    if object.get("is_error").and_then(|v| v.as_bool()) == Some(true) {
        return ValidationReport::failed(format!("{}: is_error=true", name));
    }
    if let Some(status) = object.get("status").and_then(|v| v.as_str()) {
        if status.eq_ignore_ascii_case("error") || status.eq_ignore_ascii_case("fail") {
            return ValidationReport::failed(format!("{}: status='{}'", name, status));
        }
    }
    if let Some(detail) = object.get("detail").and_then(|v| v.as_str()) {
        if detail.to_lowercase().contains("not found") {
            return ValidationReport::failed(format!("{}: detail='{}'", name, detail));
        }
    }
    if object.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let has_positive = POSITIVE_RESULT_KEYS
            .iter()
            .any(|key| object.get(*key).map(|v| !v.is_null()).unwrap_or(false));
        if !has_positive {
            return ValidationReport::failed(format!(
                "{}: success=false with no result fields",
                name
            ));
        }
    }
    ValidationReport::passed()
}

/// Regular files at the top level, then one level deep.
fn collect_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    if depth == 0 {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_file() {
            out.push(path);
        } else if path.is_dir() {
            collect_files(&path, depth - 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(dir: &Path) -> EvidenceValidator {
        EvidenceValidator::new(dir.to_path_buf(), true)
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let report = validator(&dir.path().join("absent")).check();
        assert!(!report.success);
        assert!(report.errors[0].contains("no_evidence"));
    }

    #[test]
    fn test_empty_directory_default_fails() {
        let dir = tempfile::tempdir().unwrap();
        let report = validator(dir.path()).check();
        assert!(!report.success);
    }

    #[test]
    fn test_empty_directory_legacy_warns() {
        let dir = tempfile::tempdir().unwrap();
        let report = EvidenceValidator::new(dir.path().to_path_buf(), false).check();
        assert!(report.success);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_clean_evidence_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("result.json"),
            r#"{"status": "ok", "passed": 12}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "all checks green").unwrap();
        let report = validator(dir.path()).check();
        assert!(report.success, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_detail_not_found_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ctl.json"),
            r#"{"detail": "Orchestrator not found"}"#,
        )
        .unwrap();
        let report = validator(dir.path()).check();
        assert!(!report.success);
        assert!(report.errors[0].contains("detail='Orchestrator not found'"));
    }

    #[test]
    fn test_json_error_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            ("a.json", "null"),
            ("b.json", "{}"),
            ("c.json", r#"{"error": "boom"}"#),
            ("d.json", r#"{"is_error": true}"#),
            ("e.json", r#"{"status": "FAIL"}"#),
            ("f.json", r#"{"success": false}"#),
        ];
        for (name, content) in cases {
            std::fs::write(dir.path().join(name), content).unwrap();
            let report = validator(dir.path()).check();
            assert!(!report.success, "{} should fail", name);
            std::fs::remove_file(dir.path().join(name)).unwrap();
        }
    }

    #[test]
    fn test_success_false_with_result_field_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("partial.json"),
            r#"{"success": false, "result": "expected failure case exercised"}"#,
        )
        .unwrap();
        let report = validator(dir.path()).check();
        assert!(report.success);
    }

    #[test]
    fn test_empty_error_string_passes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.json"), r#"{"error": "", "status": "ok"}"#).unwrap();
        assert!(validator(dir.path()).check().success);
    }

    #[test]
    fn test_text_token_match_with_excerpt() {
        let dir = tempfile::tempdir().unwrap();
        let long_line = format!("prefix ERROR something went wrong {}", "x".repeat(300));
        std::fs::write(dir.path().join("log.txt"), long_line).unwrap();
        let report = validator(dir.path()).check();
        assert!(!report.success);
        // excerpt is capped
        assert!(report.errors[0].len() < 200);
        assert!(report.errors[0].contains("token 'ERROR'"));
    }

    #[test]
    fn test_text_token_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log.txt"), "the request hit a Timeout").unwrap();
        assert!(!validator(dir.path()).check().success);
    }

    #[test]
    fn test_scans_one_level_deep() {
        let dir = tempfile::tempdir().unwrap();
        let phase = dir.path().join("phase-1");
        std::fs::create_dir_all(&phase).unwrap();
        std::fs::write(phase.join("bad.json"), r#"{"is_error": true}"#).unwrap();
        let report = validator(dir.path()).check();
        assert!(!report.success);

        // two levels down is out of scope
        let deep = phase.join("nested");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::remove_file(phase.join("bad.json")).unwrap();
        std::fs::write(deep.join("bad.json"), r#"{"is_error": true}"#).unwrap();
        std::fs::write(phase.join("ok.txt"), "fine").unwrap();
        let report = validator(dir.path()).check();
        assert!(report.success);
    }

    #[test]
    fn test_merge_composes() {
        let merged = ValidationReport::passed()
            .merge(ValidationReport::failed("first"))
            .merge(ValidationReport::failed("second"));
        assert!(!merged.success);
        assert_eq!(merged.errors, vec!["first", "second"]);
    }
}
