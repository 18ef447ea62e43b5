//! Owned handle to a running child process
//!
//! Once a child is attached, three kinds of background tasks take over:
//! - one reader per pipe, turning bytes into `OutputEvent`s on a channel
//! - a collector draining that channel into the `OutputAggregator`
//! - a supervisor that owns the `Child`, waits for exit, serves kill
//!   requests, and reports on two oneshot channels: the exit code as soon
//!   as the process is reaped, then an `ExitReport` once output has drained
//!
//! Nothing outside the supervisor touches the `Child`, so kill requests and
//! the exit wait never contend for it.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::output::{OutputAggregator, StreamKind};
use crate::error::ProcessError;

/// Event emitted by a pipe reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// One line, terminator stripped
    Line(StreamKind, String),
    /// End of stream; distinct from an empty line
    Closed(StreamKind),
}

/// What the supervisor knows once the process is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code; `128 + signal` for a signalled Unix process
    pub exit_code: Option<i32>,
    /// Whether both pipes reached end-of-stream before the drain grace ran out
    pub drained: bool,
}

/// Receivers for the two stages of a child's end
#[derive(Debug)]
pub struct ExitSignals {
    /// Exit code, sent right after the process is reaped
    pub exited: oneshot::Receiver<Option<i32>>,
    /// Sent once output has drained or the drain grace ran out
    pub drained: oneshot::Receiver<ExitReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillScope {
    Process,
    Tree,
}

/// Spawn a prepared command, mapping launch failures to `SpawnFailed`
pub fn spawn_child(command: &mut Command, display: &str) -> Result<Child, ProcessError> {
    command.spawn().map_err(|e| ProcessError::SpawnFailed {
        command: display.to_string(),
        error: e.to_string(),
    })
}

/// Handle used to signal a supervised child
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<KillScope>,
}

impl ProcessHandle {
    /// Take ownership of a freshly spawned child and start its I/O tasks.
    ///
    /// Must be called from within a tokio runtime. `drain_grace` bounds how
    /// long output is drained after the process exits.
    pub fn attach(
        mut child: Child,
        aggregator: Arc<OutputAggregator>,
        drain_grace: Duration,
    ) -> (Self, ExitSignals) {
        let pid = child.id();
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited) = oneshot::channel();
        let (drained_tx, drained) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, StreamKind::Stdout, event_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, StreamKind::Stderr, event_tx.clone()));
        }
        // The collector finishes once every reader has dropped its sender
        drop(event_tx);

        let collector = tokio::spawn(collect(event_rx, aggregator));
        tokio::spawn(supervise(
            child,
            pid,
            kill_rx,
            collector,
            drain_grace,
            exited_tx,
            drained_tx,
        ));

        (Self { pid, kill_tx }, ExitSignals { exited, drained })
    }

    /// OS process id, if the platform reported one at spawn
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination of the process, or of its whole process group.
    ///
    /// Never fails: a request that arrives after the process exited is
    /// dropped silently.
    pub fn kill(&self, entire_tree: bool) {
        let scope = if entire_tree {
            KillScope::Tree
        } else {
            KillScope::Process
        };
        if self.kill_tx.send(scope).is_err() {
            tracing::trace!(pid = ?self.pid, "kill requested after exit; ignoring");
        }
    }
}

/// Read `reader` line by line and forward each line as an event
async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    kind: StreamKind,
    tx: mpsc::UnboundedSender<OutputEvent>,
) {
    let mut buf_reader = BufReader::new(reader);
    // Reuse the byte buffer across lines; output may not be valid UTF-8
    let mut line = Vec::with_capacity(4096);

    loop {
        line.clear();
        match buf_reader.read_until(b'\n', &mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let text = String::from_utf8_lossy(strip_line_ending(&line)).into_owned();
                if tx.send(OutputEvent::Line(kind, text)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(stream = %kind, "Error reading output: {}", e);
                break;
            }
        }
    }

    let _ = tx.send(OutputEvent::Closed(kind));
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

async fn collect(mut rx: mpsc::UnboundedReceiver<OutputEvent>, aggregator: Arc<OutputAggregator>) {
    while let Some(event) = rx.recv().await {
        match event {
            OutputEvent::Line(kind, line) => aggregator.append_line(kind, &line),
            OutputEvent::Closed(kind) => tracing::trace!(stream = %kind, "stream drained"),
        }
    }
}

async fn supervise(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: mpsc::UnboundedReceiver<KillScope>,
    mut collector: JoinHandle<()>,
    drain_grace: Duration,
    exited_tx: oneshot::Sender<Option<i32>>,
    drained_tx: oneshot::Sender<ExitReport>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(scope) = kill_rx.recv() => terminate(&mut child, pid, scope),
        }
    };
    // Later kill requests must fail fast instead of queueing
    drop(kill_rx);

    let exit_code = match status {
        Ok(status) => exit_code_of(status),
        Err(e) => {
            tracing::warn!(pid = ?pid, "Failed to wait for process: {}", e);
            None
        }
    };
    tracing::debug!(pid = ?pid, exit_code = ?exit_code, "process exited");
    let _ = exited_tx.send(exit_code);

    let drained = match tokio::time::timeout(drain_grace, &mut collector).await {
        Ok(_) => true,
        Err(_) => {
            tracing::warn!(
                pid = ?pid,
                grace_ms = drain_grace.as_millis() as u64,
                "Output pipes still open after exit; abandoning drain"
            );
            collector.abort();
            false
        }
    };

    tracing::trace!(pid = ?pid, drained, "output drain finished");
    let _ = drained_tx.send(ExitReport { exit_code, drained });
}

#[cfg(unix)]
fn terminate(child: &mut Child, pid: Option<u32>, scope: KillScope) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child leads its own process group (see StartConfiguration), so the
    // group id equals its pid. The child is not yet reaped here, which keeps
    // that id from being reused.
    if let (KillScope::Tree, Some(pid)) = (scope, pid) {
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid, "Failed to signal process group: {}", e),
        }
        return;
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!(pid = ?pid, "Kill raced with exit: {}", e);
    }
}

// Without process groups only the root process can be signalled.
#[cfg(not(unix))]
fn terminate(child: &mut Child, pid: Option<u32>, _scope: KillScope) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(pid = ?pid, "Kill raced with exit: {}", e);
    }
}

fn exit_code_of(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StartConfiguration;

    const GRACE: Duration = Duration::from_secs(5);

    fn launch(program: &str, args: &str) -> (ProcessHandle, ExitSignals, Arc<OutputAggregator>) {
        let config = StartConfiguration::new(program)
            .with_arguments(args)
            .redirected();
        let mut cmd = config.to_command().unwrap();
        let child = spawn_child(&mut cmd, &config.display_command()).unwrap();
        let aggregator = Arc::new(OutputAggregator::new());
        let (handle, signals) = ProcessHandle::attach(child, Arc::clone(&aggregator), GRACE);
        (handle, signals, aggregator)
    }

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending(b"abc\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc"), b"abc");
        assert_eq!(strip_line_ending(b"\n"), b"");
    }

    #[tokio::test]
    async fn test_spawn_child_missing_executable() {
        let mut cmd = Command::new("nonexistent_command_12345");
        match spawn_child(&mut cmd, "nonexistent_command_12345") {
            Err(ProcessError::SpawnFailed { command, .. }) => {
                assert_eq!(command, "nonexistent_command_12345")
            }
            other => panic!("Expected SpawnFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_report_after_drain() {
        let (handle, signals, aggregator) =
            launch("sh", r#"-c "echo out; echo err >&2; exit 3""#);
        assert!(handle.id().is_some());

        assert_eq!(signals.exited.await.unwrap(), Some(3));
        let report = signals.drained.await.unwrap();
        assert_eq!(report.exit_code, Some(3));
        assert!(report.drained);
        assert_eq!(aggregator.stdout_text(), "out\n");
        assert_eq!(aggregator.stderr_text(), "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_blank_lines_are_not_end_of_stream() {
        let (_handle, signals, aggregator) = launch("printf", r"'a\n\n\nb\n'");
        signals.drained.await.unwrap();
        assert_eq!(aggregator.stdout_text(), "a\n\n\nb\n");
        assert_eq!(aggregator.line_count(StreamKind::Stdout), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_tree_reports_signal_exit() {
        let (handle, signals, _aggregator) = launch("sh", r#"-c "sleep 30 & sleep 30""#);
        handle.kill(true);

        let report = tokio::time::timeout(Duration::from_secs(10), signals.drained)
            .await
            .expect("process tree should die")
            .unwrap();
        assert_eq!(report.exit_code, Some(128 + 9));
        // The backgrounded sleep shared the pipes; it died with the group
        assert!(report.drained);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_after_exit_is_silent() {
        let (handle, signals, _aggregator) = launch("true", "");
        signals.drained.await.unwrap();
        handle.kill(true);
        handle.kill(false);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_reported_before_pipes_close() {
        // The backgrounded sleep keeps stdout open after the shell exits
        let config = StartConfiguration::new("sh")
            .with_arguments(r#"-c "sleep 3 & echo hi""#)
            .redirected();
        let mut cmd = config.to_command().unwrap();
        let child = spawn_child(&mut cmd, &config.display_command()).unwrap();
        let aggregator = Arc::new(OutputAggregator::new());
        let (_handle, signals) =
            ProcessHandle::attach(child, Arc::clone(&aggregator), Duration::from_millis(300));

        let exit_code = tokio::time::timeout(Duration::from_secs(2), signals.exited)
            .await
            .expect("exit should be reported while the pipe is still open")
            .unwrap();
        assert_eq!(exit_code, Some(0));

        let report = signals.drained.await.unwrap();
        assert!(!report.drained);
        assert_eq!(aggregator.stdout_text(), "hi\n");
    }
}
