//! Error types for proclaunch
//!
//! Provides structured error types with suggestions for common issues.

use serde::Serialize;
use thiserror::Error;

/// Main error type for process execution
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The runner was used in a way its lifecycle does not allow
    /// (started twice, waited on before starting).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The argument string could not be split into argv
    #[error("Invalid arguments for {program}: {reason}")]
    InvalidArguments { program: String, reason: String },

    /// The OS refused to launch the executable
    #[error("Failed to spawn command: {command}")]
    SpawnFailed { command: String, error: String },

    /// The OS did not accept the launch within the startup timeout
    #[error("Process did not start within {timeout_ms}ms: {command}")]
    StartupTimeout { command: String, timeout_ms: u64 },

    /// The caller cancelled while the process was starting
    #[error("Startup cancelled: {command}")]
    StartupCancelled { command: String },

    /// The process ran longer than allowed
    #[error("Command timed out after {timeout_ms}ms: {command}")]
    Timeout { command: String, timeout_ms: u64 },

    /// The caller abandoned a wait; the process is unaffected
    #[error("Wait cancelled: {command}")]
    WaitCancelled { command: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Shorthand for the lifecycle-misuse condition
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Whether this error is one of the timeout conditions
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StartupTimeout { .. })
    }
}

/// Serializable error info for CLI JSON output
#[derive(Debug, Serialize, Clone)]
pub struct ErrorInfo {
    pub message: String,
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl From<&ProcessError> for ErrorInfo {
    fn from(err: &ProcessError) -> Self {
        let (error_type, suggestion) = match err {
            ProcessError::InvalidOperation(_) => (
                "invalid_operation",
                Some("A runner is single-use; create a new runner for each launch".to_string()),
            ),
            ProcessError::InvalidArguments { .. } => (
                "invalid_arguments",
                Some("Check quoting in the argument string".to_string()),
            ),
            ProcessError::SpawnFailed { error, .. } => (
                "spawn_failed",
                Some(format!("Check if the command exists: {}", error)),
            ),
            ProcessError::StartupTimeout { .. } => (
                "startup_timeout",
                Some("Increase startup_timeout_ms or check system load".to_string()),
            ),
            ProcessError::StartupCancelled { .. } => ("startup_cancelled", None),
            ProcessError::Timeout { .. } => (
                "timeout",
                Some("Try increasing the timeout or checking if the command hangs".to_string()),
            ),
            ProcessError::WaitCancelled { .. } => ("wait_cancelled", None),
            ProcessError::Config(_) => (
                "config_error",
                Some("Check your proclaunch configuration file".to_string()),
            ),
            ProcessError::Io(_) => ("io_error", None),
        };

        ErrorInfo {
            message: err.to_string(),
            error_type: error_type.to_string(),
            suggestion,
        }
    }
}

/// Suggest fixes for common error patterns in a failed process's stderr
pub fn suggest_fix(program: &str, stderr: &str) -> Option<String> {
    if stderr.contains("Permission denied") {
        return Some(
            "Permission denied. Check file permissions or run with appropriate access.".to_string(),
        );
    }

    if stderr.contains("command not found") || stderr.contains("not found") {
        return Some(format!(
            "A command invoked by '{}' was not found. Check PATH and dependencies.",
            program
        ));
    }

    if stderr.contains("No such file") {
        return Some(
            "File not found. Check the working directory and file existence.".to_string(),
        );
    }

    if stderr.contains("Killed") || stderr.contains("Out of memory") {
        return Some("The process was killed, possibly by the OOM killer.".to_string());
    }

    None
}
