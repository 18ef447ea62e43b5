//! Non-blocking process execution with live, pollable state
//!
//! `AsyncProcessRunner` launches a process and returns as soon as the OS has
//! accepted it. Callers can poll state and captured output at any time, await
//! completion, or kill the process tree.
//!
//! Two paths can end a run: the exit notification from the process handle,
//! and the run-timeout watchdog. Both claim the terminal state with one
//! compare-and-set from `Running`; whichever lands first decides between
//! `Completed`/`Failed` and `TimedOut`, and the other becomes a no-op.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::handle::{spawn_child, ExitSignals, ProcessHandle};
use super::output::OutputAggregator;
use super::result::{ExecutionResult, RunnerState, StateCell, EXIT_CODE_UNSET};
use super::start_info::StartConfiguration;
use crate::error::ProcessError;

/// Default bound on how long the OS may take to accept a launch
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default bound on output draining after the process exits
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(2000);

/// State shared with the background exit and watchdog tasks
#[derive(Debug)]
struct Shared {
    command: String,
    state: StateCell,
    aggregator: Arc<OutputAggregator>,
    handle: OnceLock<ProcessHandle>,
    exit_code: AtomicI32,
    result: Mutex<Option<ExecutionResult>>,
    completion: watch::Sender<bool>,
    watchdog: Mutex<Option<AbortHandle>>,
}

impl Shared {
    fn kill(&self, entire_tree: bool) {
        if let Some(handle) = self.handle.get() {
            handle.kill(entire_tree);
        }
    }

    fn cancel_watchdog(&self) {
        let watchdog = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
    }

    /// Store the final result and wake every waiter
    fn publish(&self, result: ExecutionResult) {
        self.exit_code.store(result.exit_code, Ordering::Release);
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        self.cancel_watchdog();
        self.completion.send_replace(true);
    }
}

/// Single-use runner that starts a process without blocking the caller
#[derive(Debug)]
pub struct AsyncProcessRunner {
    config: StartConfiguration,
    startup_timeout: Duration,
    run_timeout: Duration,
    drain_grace: Duration,
    start_requested: AtomicBool,
    disposed: AtomicBool,
    shared: Arc<Shared>,
}

impl AsyncProcessRunner {
    /// Create a runner; stdio redirection is forced onto `config`
    pub fn new(config: StartConfiguration) -> Self {
        Self::build(config, 0)
    }

    /// Create a runner that caps captured output per stream (0 = unbounded)
    pub fn with_output_limit(config: StartConfiguration, max_output_bytes: usize) -> Self {
        Self::build(config, max_output_bytes)
    }

    fn build(config: StartConfiguration, max_output_bytes: usize) -> Self {
        let config = config.redirected();
        let (completion, _) = watch::channel(false);
        let shared = Shared {
            command: config.display_command(),
            state: StateCell::new(RunnerState::NotStarted),
            aggregator: Arc::new(OutputAggregator::with_limit(max_output_bytes)),
            handle: OnceLock::new(),
            exit_code: AtomicI32::new(EXIT_CODE_UNSET),
            result: Mutex::new(None),
            completion,
            watchdog: Mutex::new(None),
        };

        Self {
            config,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            run_timeout: Duration::ZERO,
            drain_grace: DEFAULT_DRAIN_GRACE,
            start_requested: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            shared: Arc::new(shared),
        }
    }

    /// Bound on how long the launch itself may take. Always enforced.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Bound on run time, counted from `Running`. Zero means unbounded.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Bound on output draining after exit
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    pub fn config(&self) -> &StartConfiguration {
        &self.config
    }

    /// Launch the process.
    ///
    /// Returns once the OS has accepted the launch and output capture, exit
    /// tracking and (if configured) the run-timeout watchdog are wired up.
    /// `cancel` only abandons the launch wait.
    ///
    /// # Errors
    /// * `ProcessError::InvalidOperation` - `start` was already called
    /// * `ProcessError::SpawnFailed` - the executable could not be launched
    /// * `ProcessError::StartupTimeout` - the launch exceeded the startup timeout
    /// * `ProcessError::StartupCancelled` - `cancel` fired during the launch
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), ProcessError> {
        if self.start_requested.swap(true, Ordering::AcqRel) {
            return Err(ProcessError::invalid_operation(
                "start() may only be called once per runner",
            ));
        }
        self.shared
            .state
            .transition(RunnerState::NotStarted, RunnerState::Starting);
        let launch_started = Instant::now();

        // Neither an already-cancelled token nor a zero deadline can be met
        if cancel.is_cancelled() {
            let e = ProcessError::StartupCancelled {
                command: self.shared.command.clone(),
            };
            return Err(self.fail_start(e, launch_started));
        }
        if self.startup_timeout.is_zero() {
            let e = ProcessError::StartupTimeout {
                command: self.shared.command.clone(),
                timeout_ms: 0,
            };
            return Err(self.fail_start(e, launch_started));
        }

        let mut command = match self.config.to_command() {
            Ok(command) => command,
            Err(e) => return Err(self.fail_start(e, launch_started)),
        };

        // Linked scope: cancelled by the caller or by the startup deadline
        let scope = cancel.child_token();
        let deadline = {
            let scope = scope.clone();
            let startup_timeout = self.startup_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(startup_timeout).await;
                scope.cancel();
            })
        };

        let display = self.shared.command.clone();
        // An abandoned launch drops its Child, and kill_on_drop reaps it
        let mut launch = tokio::task::spawn_blocking(move || spawn_child(&mut command, &display));

        let launched = tokio::select! {
            biased;
            joined = &mut launch => joined,
            _ = scope.cancelled() => {
                deadline.abort();
                let e = if cancel.is_cancelled() {
                    ProcessError::StartupCancelled {
                        command: self.shared.command.clone(),
                    }
                } else {
                    ProcessError::StartupTimeout {
                        command: self.shared.command.clone(),
                        timeout_ms: self.startup_timeout.as_millis() as u64,
                    }
                };
                return Err(self.fail_start(e, launch_started));
            }
        };
        deadline.abort();

        let child = match launched {
            Ok(Ok(child)) => child,
            Ok(Err(e)) => return Err(self.fail_start(e, launch_started)),
            Err(join_err) => {
                let e = ProcessError::Io(std::io::Error::other(format!(
                    "launch task failed: {}",
                    join_err
                )));
                return Err(self.fail_start(e, launch_started));
            }
        };

        let (handle, signals) =
            ProcessHandle::attach(child, Arc::clone(&self.shared.aggregator), self.drain_grace);
        let pid = handle.id();
        let _ = self.shared.handle.set(handle);

        let running_since = Instant::now();
        self.shared
            .state
            .transition(RunnerState::Starting, RunnerState::Running);
        tracing::debug!(
            pid = ?pid,
            command = %self.shared.command,
            startup_ms = launch_started.elapsed().as_millis() as u64,
            "process running"
        );

        if !self.run_timeout.is_zero() {
            let watchdog = tokio::spawn(run_timeout_watchdog(
                Arc::downgrade(&self.shared),
                self.run_timeout,
            ));
            *self
                .shared
                .watchdog
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(watchdog.abort_handle());
        }

        tokio::spawn(finalize_on_exit(
            Arc::clone(&self.shared),
            signals,
            running_since,
        ));

        Ok(())
    }

    fn fail_start(&self, error: ProcessError, launch_started: Instant) -> ProcessError {
        tracing::warn!(command = %self.shared.command, "Failed to start process: {}", error);
        self.shared
            .state
            .transition(RunnerState::Starting, RunnerState::Failed);
        self.shared.publish(ExecutionResult::failed_to_start(
            &error.to_string(),
            launch_started.elapsed(),
        ));
        error
    }

    /// Wait until the run reaches a terminal state and its output has drained.
    ///
    /// Returns immediately if it already has. If `cancel` fires first the
    /// wait is abandoned with `WaitCancelled`; the process keeps running.
    ///
    /// # Errors
    /// * `ProcessError::InvalidOperation` - `start` has not completed
    /// * `ProcessError::WaitCancelled` - `cancel` fired before completion
    pub async fn wait_for_exit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ProcessError> {
        if matches!(
            self.state(),
            RunnerState::NotStarted | RunnerState::Starting
        ) {
            return Err(ProcessError::invalid_operation(
                "wait_for_exit() requires a completed start()",
            ));
        }

        let mut completion = self.shared.completion.subscribe();
        tokio::select! {
            biased;
            done = async { completion.wait_for(|done| *done).await.is_ok() } => {
                if !done {
                    return Err(ProcessError::Io(std::io::Error::other(
                        "completion signal dropped",
                    )));
                }
            }
            _ = cancel.cancelled() => {
                return Err(ProcessError::WaitCancelled {
                    command: self.shared.command.clone(),
                });
            }
        }

        Ok(self.result())
    }

    /// Request termination. A no-op unless the process is running; losing
    /// the race to a natural exit is not an error.
    pub fn kill(&self, entire_process_tree: bool) {
        if self.state() != RunnerState::Running {
            return;
        }
        tracing::debug!(
            pid = ?self.process_id(),
            entire_process_tree,
            "Killing process"
        );
        self.shared.kill(entire_process_tree);
    }

    /// Release the runner: kills the process tree if still running and stops
    /// the watchdog. Safe to call repeatedly; also runs on drop.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.state() == RunnerState::Running {
            tracing::debug!(pid = ?self.process_id(), "Disposing running process");
            self.shared.kill(true);
        }
        self.shared.cancel_watchdog();
    }

    pub fn state(&self) -> RunnerState {
        self.shared.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    /// Whether the OS accepted the launch
    pub fn has_started(&self) -> bool {
        self.shared.handle.get().is_some()
    }

    pub fn has_completed(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.shared.handle.get().and_then(ProcessHandle::id)
    }

    /// Exit code, `EXIT_CODE_UNSET` until the process has exited
    pub fn exit_code(&self) -> i32 {
        self.shared.exit_code.load(Ordering::Acquire)
    }

    /// Stdout captured so far
    pub fn output_text(&self) -> String {
        self.shared.aggregator.stdout_text()
    }

    /// Stderr captured so far
    pub fn error_text(&self) -> String {
        self.shared.aggregator.stderr_text()
    }

    pub fn output(&self) -> &OutputAggregator {
        &self.shared.aggregator
    }

    /// Snapshot of the outcome.
    ///
    /// Stable once `wait_for_exit` can return. Before that it reflects the
    /// output captured so far; after the process exits the classification
    /// is already final while output may still be draining.
    pub fn result(&self) -> ExecutionResult {
        if let Some(result) = self
            .shared
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return result.clone();
        }

        let output = self.shared.aggregator.snapshot();
        let state = self.state();
        ExecutionResult {
            exit_code: self.exit_code(),
            is_success: state == RunnerState::Completed,
            is_error: matches!(state, RunnerState::Failed | RunnerState::TimedOut),
            is_timeout: state == RunnerState::TimedOut,
            output_text: output.stdout,
            error_text: output.stderr,
            stdout_truncated: output.stdout_truncated,
            stderr_truncated: output.stderr_truncated,
            ..ExecutionResult::default()
        }
    }
}

impl Drop for AsyncProcessRunner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Kill the process tree if it is still running once `run_timeout` elapses
async fn run_timeout_watchdog(shared: Weak<Shared>, run_timeout: Duration) {
    tokio::time::sleep(run_timeout).await;

    let Some(shared) = shared.upgrade() else {
        return;
    };
    if shared.state.claim_terminal(RunnerState::TimedOut) {
        tracing::warn!(
            command = %shared.command,
            timeout_ms = run_timeout.as_millis() as u64,
            "Run timeout exceeded; killing process tree"
        );
        shared.kill(true);
    }
}

/// Classify the run as soon as the process is reaped, then publish the
/// result once output has drained
async fn finalize_on_exit(shared: Arc<Shared>, signals: ExitSignals, running_since: Instant) {
    let exit_code = signals.exited.await.ok().flatten();
    let run_time = running_since.elapsed();
    let code = exit_code.unwrap_or(EXIT_CODE_UNSET);
    let natural = if code == 0 {
        RunnerState::Completed
    } else {
        RunnerState::Failed
    };

    // Exit code first, so a terminal state is never seen without it
    shared.exit_code.store(code, Ordering::Release);
    let claimed = shared.state.claim_terminal(natural);
    if claimed {
        shared.cancel_watchdog();
    }
    tracing::debug!(
        command = %shared.command,
        exit_code = code,
        state = %shared.state.get(),
        "process finished"
    );

    // A grandchild may hold the pipes past exit; the drain is bounded
    let _ = signals.drained.await;

    let output = shared.aggregator.snapshot();
    let result = if claimed {
        ExecutionResult::exited(code, output, run_time)
    } else {
        // The watchdog claimed TimedOut first
        ExecutionResult::timed_out(exit_code, output, run_time)
    };
    shared.publish(result);
}
