// Structured run logger
//
// Appends one JSON line per entry to .agent/logs/ralph_<timestamp>.log.
// Files rotate at 10 MiB keeping 3 numbered backups; the run directory is
// the only sink (no database, no stdout noise).

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::utils::time::{now_millis, timestamp_slug};

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const MAX_BACKUPS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64, // Unix timestamp in milliseconds
    pub level: LogLevel,
    pub component: String, // e.g. "supervisor", "safety", "orchestrator"
    pub agent: Option<String>,
    pub iteration: Option<u32>,
    pub message: String,
}

struct LogSink {
    path: PathBuf,
    file: std::fs::File,
    written: u64,
}

pub struct Logger {
    sink: Arc<Mutex<LogSink>>,
}

impl Logger {
    /// Open a fresh log file under the given directory.
    pub fn new(logs_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&logs_dir)?;
        let path = logs_dir.join(format!("ralph_{}.log", timestamp_slug()));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            sink: Arc::new(Mutex::new(LogSink {
                path,
                file,
                written,
            })),
        })
    }

    /// Path of the active log file.
    pub async fn path(&self) -> PathBuf {
        self.sink.lock().await.path.clone()
    }

    pub async fn log(&self, entry: LogEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(_) => return,
        };
        let mut sink = self.sink.lock().await;
        if sink.written + line.len() as u64 + 1 > MAX_LOG_BYTES {
            if let Err(e) = rotate(&mut sink) {
                eprintln!("[logger] rotation failed: {}", e);
            }
        }
        if writeln!(sink.file, "{}", line).is_ok() {
            sink.written += line.len() as u64 + 1;
        }
    }

    pub async fn debug(&self, component: &str, message: &str) {
        self.log(entry(LogLevel::Debug, component, message, None, None))
            .await;
    }

    pub async fn info(&self, component: &str, message: &str) {
        self.log(entry(LogLevel::Info, component, message, None, None))
            .await;
    }

    pub async fn warning(&self, component: &str, message: &str) {
        self.log(entry(LogLevel::Warning, component, message, None, None))
            .await;
    }

    pub async fn error(&self, component: &str, message: &str) {
        self.log(entry(LogLevel::Error, component, message, None, None))
            .await;
    }

    /// Full-form entry for iteration-scoped records.
    pub async fn log_iteration(
        &self,
        level: LogLevel,
        component: &str,
        message: &str,
        agent: &str,
        iteration: u32,
    ) {
        self.log(entry(
            level,
            component,
            message,
            Some(agent.to_string()),
            Some(iteration),
        ))
        .await;
    }
}

fn entry(
    level: LogLevel,
    component: &str,
    message: &str,
    agent: Option<String>,
    iteration: Option<u32>,
) -> LogEntry {
    LogEntry {
        timestamp: now_millis(),
        level,
        component: component.to_string(),
        agent,
        iteration,
        message: message.to_string(),
    }
}

/// Shift ralph_x.log.{1,2} up and reopen a fresh active file. The oldest
/// backup falls off the end.
fn rotate(sink: &mut LogSink) -> std::io::Result<()> {
    sink.file.flush()?;
    for n in (1..MAX_BACKUPS).rev() {
        let from = backup_path(&sink.path, n);
        if from.exists() {
            std::fs::rename(&from, backup_path(&sink.path, n + 1))?;
        }
    }
    std::fs::rename(&sink.path, backup_path(&sink.path, 1))?;
    sink.file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&sink.path)?;
    sink.written = 0;
    Ok(())
}

fn backup_path(path: &std::path::Path, n: u32) -> PathBuf {
    PathBuf::from(format!("{}.{}", path.display(), n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(dir.path().to_path_buf()).unwrap();
        logger.info("supervisor", "starting run").await;
        logger.error("safety", "cost limit reached").await;

        let path = logger.path().await;
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: LogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.component, "supervisor");
        assert_eq!(first.message, "starting run");

        let second: LogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_log_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(dir.path().to_path_buf()).unwrap();
        let name = logger
            .path()
            .await
            .file_name()
            .unwrap()
            .to_string_lossy()
            .to_string();
        assert!(name.starts_with("ralph_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ralph_x.log");
        std::fs::write(&path, "active").unwrap();
        std::fs::write(backup_path(&path, 1), "one").unwrap();
        std::fs::write(backup_path(&path, 2), "two").unwrap();

        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        let mut sink = LogSink {
            path: path.clone(),
            file,
            written: 6,
        };
        rotate(&mut sink).unwrap();

        assert_eq!(std::fs::read_to_string(backup_path(&path, 1)).unwrap(), "active");
        assert_eq!(std::fs::read_to_string(backup_path(&path, 2)).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(backup_path(&path, 3)).unwrap(), "two");
        assert_eq!(sink.written, 0);
        assert!(path.exists());
    }
}
