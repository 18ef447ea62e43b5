//! Thread-safe accumulation of captured stdout/stderr lines
//!
//! Both buffers sit behind a single mutex. Every append and every read goes
//! through it, so a reader sees whole lines only and waits at most for one
//! append to finish.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Marker appended once when a stream exceeds its capture limit
pub const TRUNCATION_MARKER: &str = "... [output truncated] ...\n";

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Default)]
struct StreamBuffer {
    text: String,
    lines: usize,
    truncated: bool,
}

impl StreamBuffer {
    fn push_line(&mut self, line: &str, limit: Option<usize>) {
        if self.truncated {
            return;
        }
        if let Some(max) = limit {
            if self.text.len() + line.len() + 1 > max {
                self.text.push_str(TRUNCATION_MARKER);
                self.truncated = true;
                return;
            }
        }
        self.text.push_str(line);
        self.text.push('\n');
        self.lines += 1;
    }
}

#[derive(Debug, Default)]
struct Buffers {
    stdout: StreamBuffer,
    stderr: StreamBuffer,
}

impl Buffers {
    fn stream(&self, kind: StreamKind) -> &StreamBuffer {
        match kind {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamBuffer {
        match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }
}

/// Point-in-time copy of both captured streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Mutex-guarded accumulator for a child's stdout and stderr
#[derive(Debug, Default)]
pub struct OutputAggregator {
    buffers: Mutex<Buffers>,
    limit: Option<usize>,
}

impl OutputAggregator {
    /// Create an aggregator with no capture limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an aggregator that stops capturing a stream after `max_bytes`.
    /// A limit of zero means unbounded.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffers: Mutex::new(Buffers::default()),
            limit: (max_bytes > 0).then_some(max_bytes),
        }
    }

    // Appends never leave a partial line behind, so a poisoned lock still
    // guards consistent text.
    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one line (without its terminator) to a stream
    pub fn append_line(&self, kind: StreamKind, line: &str) {
        let limit = self.limit;
        self.lock().stream_mut(kind).push_line(line, limit);
    }

    pub fn stdout_text(&self) -> String {
        self.lock().stdout.text.clone()
    }

    pub fn stderr_text(&self) -> String {
        self.lock().stderr.text.clone()
    }

    /// Number of lines captured so far on a stream
    pub fn line_count(&self, kind: StreamKind) -> usize {
        self.lock().stream(kind).lines
    }

    pub fn is_truncated(&self, kind: StreamKind) -> bool {
        self.lock().stream(kind).truncated
    }

    /// Copy both streams under one lock acquisition
    pub fn snapshot(&self) -> OutputSnapshot {
        let buffers = self.lock();
        OutputSnapshot {
            stdout: buffers.stdout.text.clone(),
            stderr: buffers.stderr.text.clone(),
            stdout_truncated: buffers.stdout.truncated,
            stderr_truncated: buffers.stderr.truncated,
        }
    }
}
