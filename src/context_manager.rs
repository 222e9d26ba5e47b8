// Context manager
//
// Owns the prompt file and the bounded context rings the loop feeds back
// into each iteration's prompt: a stable prefix that is never evicted, a
// dynamic ring of recent iteration summaries, error history, and success
// patterns. Also owns the task queue persisted to .agent/task-list.json.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{IoError, ResultExt, SupervisorResult};
use crate::utils::string::truncate_with_ellipsis;
use crate::utils::time::now_rfc3339;

const DYNAMIC_CAP: usize = 5;
const ERROR_CAP: usize = 5;
const SUCCESS_CAP: usize = 3;

/// Bytes of agent output folded into a single context entry.
const SUMMARY_MAX_BYTES: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Status may only advance: pending -> in_progress -> completed|failed.
    fn can_advance_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub completed_at: Option<String>,
}

/// On-disk form of the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListFile {
    pub prompt_file: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub tasks: Vec<TaskRecord>,
}

pub struct ContextManager {
    prompt_path: PathBuf,
    task_list_path: PathBuf,
    scratchpad_path: PathBuf,
    stable_prefix: Vec<String>,
    dynamic: VecDeque<String>,
    errors: VecDeque<String>,
    successes: VecDeque<String>,
    tasks: Vec<TaskRecord>,
}

impl ContextManager {
    /// Initialize from the on-disk prompt; loads an existing task list if
    /// one is present and makes sure the scratchpad exists.
    pub fn new(
        prompt_path: PathBuf,
        task_list_path: PathBuf,
        scratchpad_path: PathBuf,
    ) -> SupervisorResult<Self> {
        if !prompt_path.exists() {
            return Err(IoError::NotFound(prompt_path.display().to_string()).into());
        }
        let tasks = if task_list_path.exists() {
            let content = std::fs::read_to_string(&task_list_path)?;
            let file: TaskListFile = serde_json::from_str(&content)?;
            file.tasks
        } else {
            Vec::new()
        };
        if !scratchpad_path.exists() {
            if let Some(parent) = scratchpad_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&scratchpad_path, "# Scratchpad\n")?;
        }
        Ok(Self {
            prompt_path,
            task_list_path,
            scratchpad_path,
            stable_prefix: Vec::new(),
            dynamic: VecDeque::new(),
            errors: VecDeque::new(),
            successes: VecDeque::new(),
            tasks,
        })
    }

    pub fn scratchpad_path(&self) -> &PathBuf {
        &self.scratchpad_path
    }

    /// Add a line to the stable prefix. Prefix entries are never evicted.
    pub fn push_stable_prefix(&mut self, line: impl Into<String>) {
        self.stable_prefix.push(line.into());
    }

    /// Raw prompt bytes, re-read from disk every call so changes made by
    /// the agent during the previous iteration are captured.
    pub fn raw_prompt(&self) -> SupervisorResult<String> {
        std::fs::read_to_string(&self.prompt_path).context("reading prompt file")
    }

    /// The enhanced prompt: raw prompt plus a bounded context block with
    /// the most recent entries first.
    pub fn prompt(&self) -> SupervisorResult<String> {
        let raw = self.raw_prompt()?;
        let mut sections = Vec::new();

        if !self.stable_prefix.is_empty() {
            sections.push(format!(
                "## Instructions\n{}",
                self.stable_prefix.join("\n")
            ));
        }
        if !self.dynamic.is_empty() {
            sections.push(block("Recent iterations", &self.dynamic));
        }
        if !self.errors.is_empty() {
            sections.push(block("Recent errors", &self.errors));
        }
        if !self.successes.is_empty() {
            sections.push(block("What worked", &self.successes));
        }

        if sections.is_empty() {
            return Ok(raw);
        }
        Ok(format!("{}\n\n---\n\n{}\n", raw.trim_end(), sections.join("\n\n")))
    }

    /// Fold one iteration's output into the dynamic ring, bounded.
    pub fn append_iteration_summary(&mut self, iteration: u32, output: &str) {
        let summary = format!(
            "[{}] {}",
            iteration,
            truncate_with_ellipsis(&crate::utils::string::single_line(output), SUMMARY_MAX_BYTES)
        );
        push_bounded(&mut self.dynamic, summary, DYNAMIC_CAP);
    }

    pub fn append_error_note(&mut self, note: impl Into<String>) {
        push_bounded(&mut self.errors, note.into(), ERROR_CAP);
    }

    pub fn append_success_note(&mut self, note: impl Into<String>) {
        push_bounded(&mut self.successes, note.into(), SUCCESS_CAP);
    }

    // -- task queue ---------------------------------------------------

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    /// Append a new pending task. Descriptions are immutable once recorded.
    pub fn add_task(&mut self, description: impl Into<String>) -> SupervisorResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.tasks.push(TaskRecord {
            id: id.clone(),
            description: description.into(),
            status: TaskStatus::Pending,
            completed_at: None,
        });
        self.save_tasks()?;
        Ok(id)
    }

    /// pending -> in_progress
    pub fn promote_task(&mut self, id: &str) -> SupervisorResult<()> {
        self.advance_task(id, TaskStatus::InProgress)
    }

    /// in_progress -> completed|failed
    pub fn complete_task(&mut self, id: &str, success: bool) -> SupervisorResult<()> {
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.advance_task(id, status)
    }

    fn advance_task(&mut self, id: &str, next: TaskStatus) -> SupervisorResult<()> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| format!("task not found: {}", id))?;
        if !task.status.can_advance_to(next) {
            return Err(format!(
                "task {} cannot move from {:?} to {:?}",
                id, task.status, next
            )
            .into());
        }
        task.status = next;
        if matches!(next, TaskStatus::Completed | TaskStatus::Failed) {
            task.completed_at = Some(now_rfc3339());
        }
        self.save_tasks()
    }

    fn save_tasks(&self) -> SupervisorResult<()> {
        let file = TaskListFile {
            prompt_file: self.prompt_path.display().to_string(),
            total_tasks: self.tasks.len(),
            completed_tasks: self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            tasks: self.tasks.clone(),
        };
        if let Some(parent) = self.task_list_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.task_list_path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

fn block(title: &str, entries: &VecDeque<String>) -> String {
    // most recent first
    let lines: Vec<String> = entries.iter().rev().map(|e| format!("- {}", e)).collect();
    format!("## {}\n{}", title, lines.join("\n"))
}

fn push_bounded(ring: &mut VecDeque<String>, entry: String, cap: usize) {
    ring.push_back(entry);
    while ring.len() > cap {
        ring.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ContextManager) {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("PROMPT.md");
        std::fs::write(&prompt, "# Build the widget\n").unwrap();
        let manager = ContextManager::new(
            prompt,
            dir.path().join(".agent/task-list.json"),
            dir.path().join(".agent/scratchpad.md"),
        )
        .unwrap();
        (dir, manager)
    }

    #[test]
    fn test_prompt_without_context_is_raw() {
        let (_dir, manager) = setup();
        assert_eq!(manager.prompt().unwrap(), "# Build the widget\n");
    }

    #[test]
    fn test_prompt_rereads_file() {
        let (dir, manager) = setup();
        std::fs::write(dir.path().join("PROMPT.md"), "# Changed by agent\n").unwrap();
        assert!(manager.prompt().unwrap().contains("Changed by agent"));
    }

    #[test]
    fn test_context_block_most_recent_first() {
        let (_dir, mut manager) = setup();
        manager.append_iteration_summary(1, "first pass");
        manager.append_iteration_summary(2, "second pass");
        let prompt = manager.prompt().unwrap();
        let first = prompt.find("[2] second pass").unwrap();
        let second = prompt.find("[1] first pass").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_dynamic_ring_is_bounded() {
        let (_dir, mut manager) = setup();
        for i in 0..10 {
            manager.append_iteration_summary(i, "output");
        }
        assert_eq!(manager.dynamic.len(), DYNAMIC_CAP);
        assert!(manager.dynamic.front().unwrap().starts_with("[5]"));
    }

    #[test]
    fn test_success_ring_cap() {
        let (_dir, mut manager) = setup();
        for i in 0..5 {
            manager.append_success_note(format!("pattern {}", i));
        }
        assert_eq!(manager.successes.len(), SUCCESS_CAP);
    }

    #[test]
    fn test_stable_prefix_survives_everything() {
        let (_dir, mut manager) = setup();
        manager.push_stable_prefix("Always run the tests.");
        for i in 0..20 {
            manager.append_iteration_summary(i, "output");
            manager.append_error_note("err");
        }
        assert!(manager.prompt().unwrap().contains("Always run the tests."));
    }

    #[test]
    fn test_task_lifecycle() {
        let (_dir, mut manager) = setup();
        let id = manager.add_task("wire up the config loader").unwrap();
        assert_eq!(manager.tasks()[0].status, TaskStatus::Pending);

        manager.promote_task(&id).unwrap();
        assert_eq!(manager.tasks()[0].status, TaskStatus::InProgress);

        manager.complete_task(&id, true).unwrap();
        assert_eq!(manager.tasks()[0].status, TaskStatus::Completed);
        assert!(manager.tasks()[0].completed_at.is_some());
    }

    #[test]
    fn test_task_status_cannot_regress_or_skip() {
        let (_dir, mut manager) = setup();
        let id = manager.add_task("a task").unwrap();
        // pending -> completed skips in_progress
        assert!(manager.complete_task(&id, true).is_err());

        manager.promote_task(&id).unwrap();
        manager.complete_task(&id, false).unwrap();
        // terminal, cannot advance again
        assert!(manager.promote_task(&id).is_err());
    }

    #[test]
    fn test_task_descriptions_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = dir.path().join("PROMPT.md");
        std::fs::write(&prompt, "prompt").unwrap();
        let task_list = dir.path().join(".agent/task-list.json");
        let scratchpad = dir.path().join(".agent/scratchpad.md");

        let id = {
            let mut manager =
                ContextManager::new(prompt.clone(), task_list.clone(), scratchpad.clone()).unwrap();
            manager.add_task("immutable description").unwrap()
        };

        let manager = ContextManager::new(prompt, task_list, scratchpad).unwrap();
        let task = manager.tasks().iter().find(|t| t.id == id).unwrap();
        assert_eq!(task.description, "immutable description");
    }

    #[test]
    fn test_scratchpad_created() {
        let (dir, _manager) = setup();
        assert!(dir.path().join(".agent/scratchpad.md").exists());
    }
}
