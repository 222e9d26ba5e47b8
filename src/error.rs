// Unified error types for the supervisor
//
// This module provides a structured error type that replaces
// ad-hoc `Result<T, String>` usage throughout the codebase.

use std::fmt;

/// Supervisor-wide error type with structured variants for different error categories.
#[derive(Debug)]
pub enum SupervisorError {
    /// Configuration errors (missing file, invalid values, unknown keys)
    Config(ConfigError),

    /// File system and IO errors
    Io(IoError),

    /// Agent adapter errors (unavailable tool, spawn failure)
    Adapter(AdapterError),

    /// Sub-agent orchestration errors (missing tools, bad coordination files)
    Orchestration(OrchestrationError),

    /// Evidence validation errors
    Validation(ValidationError),

    /// Internal logic errors (unexpected states, invariant violations)
    Internal(String),
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file missing or unreadable
    FileError(String),
    /// Invalid configuration value
    InvalidValue { key: String, message: String },
    /// Parse failure, including unknown keys (unknown keys are a hard error)
    Parse(String),
    /// Required environment variable malformed
    BadEnvOverride { var: String, message: String },
}

/// IO and filesystem errors
#[derive(Debug)]
pub enum IoError {
    /// Standard IO error
    Std(std::io::Error),
    /// File not found
    NotFound(String),
    /// Path operation failed
    PathError(String),
}

/// Agent adapter errors.
///
/// Per-iteration failures (non-zero exit, timeout, overflow) travel inside
/// `AgentResponse` and are recorded against the iteration; this enum covers
/// the infrastructure-level failures that make an invocation impossible.
#[derive(Debug)]
pub enum AdapterError {
    /// The chosen agent binary is not present or not runnable
    Unavailable(String),
    /// The child process could not be spawned
    Spawn(String),
    /// The agent's structured output could not be parsed where structure is required
    Parse(String),
    /// The persistent agent connection was lost
    ConnectionLost(String),
}

/// Sub-agent orchestration errors
#[derive(Debug)]
pub enum OrchestrationError {
    /// A profile's required tool is missing or disabled in the catalog
    MissingTool { subagent: String, tool: String },
    /// A coordination result file is missing or invalid
    InvalidResult { id: String, message: String },
    /// Verdict aggregation was impossible
    Aggregation(String),
}

/// Evidence validation errors
#[derive(Debug)]
pub enum ValidationError {
    /// The evidence directory does not exist
    NoEvidence(String),
    /// An evidence artifact signalled an error
    EvidenceFailed(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Config(e) => write!(f, "Config error: {}", e),
            SupervisorError::Io(e) => write!(f, "IO error: {}", e),
            SupervisorError::Adapter(e) => write!(f, "Adapter error: {}", e),
            SupervisorError::Orchestration(e) => write!(f, "Orchestration error: {}", e),
            SupervisorError::Validation(e) => write!(f, "Validation error: {}", e),
            SupervisorError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileError(msg) => write!(f, "Config file error: {}", msg),
            ConfigError::InvalidValue { key, message } => {
                write!(f, "Invalid config value for '{}': {}", key, message)
            }
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::BadEnvOverride { var, message } => {
                write!(f, "Bad environment override {}: {}", var, message)
            }
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Std(e) => write!(f, "{}", e),
            IoError::NotFound(path) => write!(f, "File not found: {}", path),
            IoError::PathError(msg) => write!(f, "Path error: {}", msg),
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Unavailable(tag) => write!(f, "Agent '{}' is not available", tag),
            AdapterError::Spawn(msg) => write!(f, "Failed to spawn agent: {}", msg),
            AdapterError::Parse(msg) => write!(f, "Failed to parse agent output: {}", msg),
            AdapterError::ConnectionLost(msg) => write!(f, "Agent connection lost: {}", msg),
        }
    }
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::MissingTool { subagent, tool } => {
                write!(f, "Sub-agent '{}' requires missing tool '{}'", subagent, tool)
            }
            OrchestrationError::InvalidResult { id, message } => {
                write!(f, "Invalid coordination result '{}': {}", id, message)
            }
            OrchestrationError::Aggregation(msg) => write!(f, "Aggregation failed: {}", msg),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NoEvidence(path) => {
                write!(f, "No evidence directory at: {}", path)
            }
            ValidationError::EvidenceFailed(msg) => write!(f, "Evidence failed: {}", msg),
        }
    }
}

impl std::error::Error for SupervisorError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for IoError {}
impl std::error::Error for AdapterError {}
impl std::error::Error for OrchestrationError {}
impl std::error::Error for ValidationError {}

// From implementations for automatic error conversion

impl From<ConfigError> for SupervisorError {
    fn from(err: ConfigError) -> Self {
        SupervisorError::Config(err)
    }
}

impl From<AdapterError> for SupervisorError {
    fn from(err: AdapterError) -> Self {
        SupervisorError::Adapter(err)
    }
}

impl From<OrchestrationError> for SupervisorError {
    fn from(err: OrchestrationError) -> Self {
        SupervisorError::Orchestration(err)
    }
}

impl From<ValidationError> for SupervisorError {
    fn from(err: ValidationError) -> Self {
        SupervisorError::Validation(err)
    }
}

impl From<IoError> for SupervisorError {
    fn from(err: IoError) -> Self {
        SupervisorError::Io(err)
    }
}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io(IoError::Std(err))
    }
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        IoError::Std(err)
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        SupervisorError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for SupervisorError {
    fn from(msg: String) -> Self {
        SupervisorError::Internal(msg)
    }
}

impl From<&str> for SupervisorError {
    fn from(msg: &str) -> Self {
        SupervisorError::Internal(msg.to_string())
    }
}

/// Type alias for Results using SupervisorError
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error, converting it to SupervisorError::Internal
    fn context(self, msg: &str) -> SupervisorResult<T>;

    /// Add context with a closure for lazy evaluation
    fn with_context<F: FnOnce() -> String>(self, f: F) -> SupervisorResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> SupervisorResult<T> {
        self.map_err(|e| SupervisorError::Internal(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> SupervisorResult<T> {
        self.map_err(|e| SupervisorError::Internal(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SupervisorError::Config(ConfigError::InvalidValue {
            key: "max_cost".to_string(),
            message: "must be non-negative".to_string(),
        });
        assert!(err.to_string().contains("max_cost"));

        let err = SupervisorError::Orchestration(OrchestrationError::MissingTool {
            subagent: "validator".to_string(),
            tool: "bash".to_string(),
        });
        assert!(err.to_string().contains("validator"));
        assert!(err.to_string().contains("bash"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SupervisorError = io_err.into();
        assert!(matches!(err, SupervisorError::Io(_)));
    }

    #[test]
    fn test_context() {
        let res: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = res.context("reading prompt").unwrap_err();
        assert!(err.to_string().contains("reading prompt"));
        assert!(err.to_string().contains("boom"));
    }
}
