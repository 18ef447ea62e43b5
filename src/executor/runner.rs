//! Blocking process execution with a single overall timeout
//!
//! `SynchronousProcessRunner` runs one process to completion on the calling
//! thread. The timeout covers the whole run: process exit and the draining of
//! both output pipes must all finish inside it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use super::handle::{spawn_child, ProcessHandle};
use super::output::OutputAggregator;
use super::result::{ExecutionResult, EXIT_CODE_UNSET};
use super::start_info::StartConfiguration;
use crate::error::ProcessError;

/// Default overall timeout for a synchronous run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How long to wait for a killed process tree to be reaped
const KILL_REAP_GRACE: Duration = Duration::from_secs(1);

/// Single-use runner that blocks until the process exits or times out
#[derive(Debug)]
pub struct SynchronousProcessRunner {
    config: StartConfiguration,
    timeout: Duration,
    max_output_bytes: usize,
    has_run: bool,
    result: ExecutionResult,
}

impl SynchronousProcessRunner {
    /// Create a runner; stdio redirection is forced onto `config`
    pub fn new(config: StartConfiguration) -> Self {
        Self {
            config: config.redirected(),
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: 0,
            has_run: false,
            result: ExecutionResult::default(),
        }
    }

    /// Set the overall timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    /// Cap captured output per stream (0 = unbounded)
    pub fn with_max_output(mut self, max_bytes: usize) -> Self {
        self.max_output_bytes = max_bytes;
        self
    }

    /// Change the timeout. Has no effect once `run()` has been called.
    pub fn set_timeout(&mut self, timeout: Duration) {
        if self.has_run {
            tracing::debug!("Ignoring timeout change after run()");
            return;
        }
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn config(&self) -> &StartConfiguration {
        &self.config
    }

    /// Run the process to completion on the calling thread.
    ///
    /// A nonzero exit code is not an error: it is reported on the returned
    /// result. Safe to call from inside an async runtime: the run is then
    /// driven from a scoped thread, blocking the caller until it finishes.
    ///
    /// # Errors
    /// * `ProcessError::InvalidOperation` - `run()` was already called
    /// * `ProcessError::SpawnFailed` - the executable could not be launched
    /// * `ProcessError::Timeout` - exit or output drain exceeded the timeout;
    ///   the process tree is killed and partial output is kept on the runner
    pub fn run(&mut self) -> Result<&ExecutionResult, ProcessError> {
        if self.has_run {
            return Err(ProcessError::invalid_operation(
                "run() may only be called once per runner",
            ));
        }
        self.has_run = true;

        let outcome = if tokio::runtime::Handle::try_current().is_ok() {
            // block_on may not nest inside a runtime thread
            tracing::debug!("run() called inside a runtime; using a scoped thread");
            let this = &*self;
            std::thread::scope(|s| s.spawn(|| this.block_on_own_runtime()).join())
                .map_err(|_| ProcessError::Io(std::io::Error::other("runner thread panicked")))?
        } else {
            self.block_on_own_runtime()
        };

        let (result, error) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                self.result = ExecutionResult::failed_to_start(&e.to_string(), Duration::ZERO);
                return Err(e);
            }
        };
        self.result = result;

        match error {
            Some(e) => Err(e),
            None => Ok(&self.result),
        }
    }

    fn block_on_own_runtime(&self) -> Result<(ExecutionResult, Option<ProcessError>), ProcessError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                ProcessError::Io(std::io::Error::other(format!(
                    "Failed to create runtime: {}",
                    e
                )))
            })?;
        Ok(rt.block_on(self.execute()))
    }

    async fn execute(&self) -> (ExecutionResult, Option<ProcessError>) {
        let start = Instant::now();
        let command_str = self.config.display_command();

        let spawned = self
            .config
            .to_command()
            .and_then(|mut cmd| spawn_child(&mut cmd, &command_str));
        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = %command_str, "Failed to start process: {}", e);
                let result = ExecutionResult::failed_to_start(&e.to_string(), start.elapsed());
                return (result, Some(e));
            }
        };

        let aggregator = Arc::new(OutputAggregator::with_limit(self.max_output_bytes));
        // Drain is bounded by the overall timeout, not by a separate grace
        let (handle, signals) = ProcessHandle::attach(child, Arc::clone(&aggregator), self.timeout);
        let mut exit_rx = signals.drained;
        tracing::debug!(pid = ?handle.id(), command = %command_str, "Executing sync");

        match timeout(self.timeout, &mut exit_rx).await {
            Ok(Ok(report)) => {
                let exit_code = report.exit_code.unwrap_or(EXIT_CODE_UNSET);
                let result = ExecutionResult::exited(exit_code, aggregator.snapshot(), start.elapsed());
                (result, None)
            }
            Ok(Err(_)) => {
                let e = ProcessError::Io(std::io::Error::other("process supervisor stopped"));
                let result = ExecutionResult::failed_to_start(&e.to_string(), start.elapsed());
                (result, Some(e))
            }
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                tracing::warn!(
                    pid = ?handle.id(),
                    command = %command_str,
                    timeout_ms,
                    "Process timed out; killing process tree"
                );
                let snapshot = aggregator.snapshot();
                handle.kill(true);
                let exit_code = match timeout(KILL_REAP_GRACE, exit_rx).await {
                    Ok(Ok(report)) => report.exit_code,
                    _ => None,
                };
                let result = ExecutionResult::timed_out(exit_code, snapshot, start.elapsed());
                let error = ProcessError::Timeout {
                    command: command_str,
                    timeout_ms,
                };
                (result, Some(error))
            }
        }
    }

    /// Outcome of the run; the default (unset) result before `run()`
    pub fn result(&self) -> &ExecutionResult {
        &self.result
    }

    pub fn has_run(&self) -> bool {
        self.has_run
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success
    }

    pub fn is_error(&self) -> bool {
        self.result.is_error
    }

    pub fn is_timeout(&self) -> bool {
        self.result.is_timeout
    }

    pub fn exit_code(&self) -> i32 {
        self.result.exit_code
    }

    pub fn output_text(&self) -> &str {
        &self.result.output_text
    }

    pub fn error_text(&self) -> &str {
        &self.result.error_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(program: &str, args: &str) -> SynchronousProcessRunner {
        SynchronousProcessRunner::new(StartConfiguration::new(program).with_arguments(args))
    }

    #[test]
    fn test_defaults() {
        let r = runner("echo", "hi");
        assert_eq!(r.timeout(), DEFAULT_TIMEOUT);
        assert!(!r.has_run());
        assert_eq!(r.exit_code(), EXIT_CODE_UNSET);
        assert!(r.config().redirects_stdout());
        assert!(r.config().redirects_stderr());
        assert!(!r.config().uses_shell());
    }

    #[test]
    fn test_run_echo_hello_world() {
        let mut r = runner("echo", "\"hello world\"");
        let result = r.run().expect("echo should run");

        assert!(result.is_success);
        assert!(!result.is_error);
        assert_eq!(result.exit_code, 0);
        assert!(result.output_text.contains("hello world"));
        assert!(r.is_success());
        assert!(r.output_text().contains("hello world"));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_nonzero_exit_is_not_an_error() {
        let mut r = runner("sh", r#"-c "echo boom >&2; exit 7""#);
        let result = r.run().expect("nonzero exit is ordinary data");

        assert!(!result.is_success);
        assert!(result.is_error);
        assert!(!result.is_timeout);
        assert_eq!(result.exit_code, 7);
        assert_eq!(result.error_text, "boom\n");
    }

    #[test]
    fn test_run_twice_is_invalid() {
        let mut r = runner("echo", "once");
        r.run().unwrap();

        match r.run() {
            Err(ProcessError::InvalidOperation(_)) => {}
            other => panic!("Expected InvalidOperation, got {:?}", other),
        }
        // The first outcome is untouched
        assert!(r.is_success());
    }

    #[test]
    fn test_run_twice_after_spawn_failure_is_invalid() {
        let mut r = runner("nonexistent_command_12345", "");
        assert!(r.run().is_err());
        assert!(matches!(r.run(), Err(ProcessError::InvalidOperation(_))));
    }

    #[test]
    fn test_run_missing_executable_fails_fast() {
        let started = Instant::now();
        let mut r = runner("/definitely/not/here/nonexistent_command_12345", "");

        match r.run() {
            Err(ProcessError::SpawnFailed { command, .. }) => {
                assert!(command.contains("nonexistent_command_12345"));
            }
            other => panic!("Expected SpawnFailed, got {:?}", other),
        }
        assert!(r.is_error());
        assert!(!r.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_timeout_keeps_partial_output() {
        let mut r = runner("sh", r#"-c "echo started; sleep 30""#)
            .with_timeout(Duration::from_millis(500));
        let started = Instant::now();

        match r.run() {
            Err(ProcessError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 500),
            other => panic!("Expected Timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(r.is_timeout());
        assert!(r.is_error());
        assert!(!r.is_success());
        assert_eq!(r.output_text(), "started\n");

        // Single-use holds after a timeout too
        assert!(matches!(r.run(), Err(ProcessError::InvalidOperation(_))));
    }

    #[test]
    fn test_set_timeout_after_run_is_ignored() {
        let mut r = runner("echo", "x").with_timeout(Duration::from_secs(3));
        r.run().unwrap();
        r.set_timeout(Duration::from_millis(1));
        assert_eq!(r.timeout(), Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captures_all_lines_in_order() {
        let mut r = runner("sh", r#"-c "i=1; while [ $i -le 2000 ]; do echo line$i; i=$((i+1)); done""#);
        let result = r.run().unwrap();

        let expected: String = (1..=2000).map(|i| format!("line{}\n", i)).collect();
        assert_eq!(result.output_text, expected);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_env_and_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StartConfiguration::new("sh")
            .with_arguments(r#"-c "echo $MY_VAR; pwd""#)
            .with_env("MY_VAR", "test_value")
            .in_dir(dir.path());
        let mut r = SynchronousProcessRunner::new(config);
        let result = r.run().unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert!(result.output_text.starts_with("test_value\n"));
        assert!(result.output_text.contains(canonical.to_str().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_output_truncation() {
        let mut r = runner("sh", r#"-c "i=0; while [ $i -lt 1000 ]; do echo line $i; i=$((i+1)); done""#)
            .with_max_output(500);
        let result = r.run().unwrap();

        assert!(result.stdout_truncated);
        assert!(result.output_text.contains("[output truncated]"));
        assert!(result.output_text.len() <= 600);
    }

    #[tokio::test]
    async fn test_run_inside_current_thread_runtime() {
        let mut r = runner("echo", "nested");
        let result = r.run().expect("run should not panic inside a runtime");
        assert!(result.is_success);
        assert_eq!(result.output_text, "nested\n");
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_timeout_inside_multi_thread_runtime() {
        let mut r = runner("sleep", "30").with_timeout(Duration::from_millis(300));
        let started = Instant::now();

        assert!(matches!(r.run(), Err(ProcessError::Timeout { .. })));
        assert!(r.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
