//! Runner state machine and execution outcome

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;

use super::output::OutputSnapshot;

/// Exit code reported before the process has exited
pub const EXIT_CODE_UNSET: i32 = -1;

/// Lifecycle of an async runner
///
/// `NotStarted → Starting → Running → {Completed, Failed, TimedOut}`.
/// A failed launch goes straight from `Starting` to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RunnerState {
    NotStarted = 0,
    Starting = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    TimedOut = 5,
}

impl RunnerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Failed,
            _ => Self::TimedOut,
        }
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding a `RunnerState`
///
/// Transitions are compare-and-set so that two racing paths (natural exit
/// and the run-timeout timer) cannot both claim a terminal state.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: RunnerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> RunnerState {
        RunnerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from → to`; returns false if the current state is not `from`
    pub fn transition(&self, from: RunnerState, to: RunnerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim a terminal state from `Running`. Exactly one caller wins.
    pub fn claim_terminal(&self, to: RunnerState) -> bool {
        debug_assert!(to.is_terminal());
        self.transition(RunnerState::Running, to)
    }
}

/// Outcome of one process execution
///
/// A timed-out run reports `is_error` as well as `is_timeout`, so
/// `is_completed()` holds for every terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Exit code, `EXIT_CODE_UNSET` until the process has exited
    pub exit_code: i32,
    pub is_success: bool,
    pub is_error: bool,
    pub is_timeout: bool,
    pub output_text: String,
    pub error_text: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Time from launch to the terminal outcome
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            exit_code: EXIT_CODE_UNSET,
            is_success: false,
            is_error: false,
            is_timeout: false,
            output_text: String::new(),
            error_text: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::ZERO,
        }
    }
}

impl ExecutionResult {
    /// Result for a process that exited on its own
    pub fn exited(exit_code: i32, output: OutputSnapshot, duration: Duration) -> Self {
        Self {
            exit_code,
            is_success: exit_code == 0,
            is_error: exit_code != 0,
            ..Self::with_output(output, duration)
        }
    }

    /// Result for a process that exceeded its time budget
    pub fn timed_out(exit_code: Option<i32>, output: OutputSnapshot, duration: Duration) -> Self {
        Self {
            exit_code: exit_code.unwrap_or(EXIT_CODE_UNSET),
            is_error: true,
            is_timeout: true,
            ..Self::with_output(output, duration)
        }
    }

    /// Result for a process that never launched
    pub fn failed_to_start(error: &str, duration: Duration) -> Self {
        Self {
            is_error: true,
            error_text: error.to_string(),
            duration,
            ..Self::default()
        }
    }

    fn with_output(output: OutputSnapshot, duration: Duration) -> Self {
        Self {
            output_text: output.stdout,
            error_text: output.stderr,
            stdout_truncated: output.stdout_truncated,
            stderr_truncated: output.stderr_truncated,
            duration,
            ..Self::default()
        }
    }

    /// `is_error || is_success`
    pub fn is_completed(&self) -> bool {
        self.is_error || self.is_success
    }
}
