//! proclaunch - supervised external process execution
//!
//! Launches external programs with captured output, timeouts and
//! process-tree termination:
//! - **SynchronousProcessRunner** - blocks until exit under one overall timeout
//! - **AsyncProcessRunner** - explicit lifecycle state machine with startup
//!   and run timeouts, cancellation, live output and tree kill
//!
//! ## Features
//!
//! - Line-by-line capture of stdout and stderr into one aggregator
//! - Single-use runners with a single, race-free terminal outcome
//! - XDG-compliant layered configuration with named launch profiles
//! - Environment variable and shell command interpolation in config

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::{ErrorInfo, ProcessError};
pub use executor::{
    AsyncProcessRunner, ExecutionResult, OutputAggregator, RunnerState, StartConfiguration,
    SynchronousProcessRunner,
};
