//! Process execution module
//!
//! Provides single-use child process runners with:
//! - Blocking execution under one overall timeout (`SynchronousProcessRunner`)
//! - Non-blocking execution with live state, startup and run timeouts, and
//!   process-tree kill (`AsyncProcessRunner`)
//! - Mutex-guarded stdout/stderr capture (`OutputAggregator`)

pub mod async_runner;
pub mod handle;
pub mod output;
pub mod result;
pub mod runner;
pub mod start_info;

pub use async_runner::{AsyncProcessRunner, DEFAULT_DRAIN_GRACE, DEFAULT_STARTUP_TIMEOUT};
pub use handle::{ExitReport, ExitSignals, OutputEvent, ProcessHandle};
pub use output::{OutputAggregator, OutputSnapshot, StreamKind, TRUNCATION_MARKER};
pub use result::{ExecutionResult, RunnerState, EXIT_CODE_UNSET};
pub use runner::{SynchronousProcessRunner, DEFAULT_TIMEOUT};
pub use start_info::StartConfiguration;
