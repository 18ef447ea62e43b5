//! CLI command definitions using clap
//!
//! Defines all CLI subcommands and their arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashMap;

/// Launch external processes with timeouts, output capture and tree kill.
///
/// Runs a program either blocking (`run`) or supervised (`spawn`), or runs
/// a named launch profile from the configuration.
#[derive(Parser, Debug)]
#[command(name = "proclaunch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path (overrides default XDG paths)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a program to completion, blocking on a single timeout
    Run(RunArgs),

    /// Start a program under supervision (Ctrl-C kills the process tree)
    Spawn(SpawnArgs),

    /// Run a configured launch profile
    Profile(ProfileArgs),

    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Target shared by `run` and `spawn`
#[derive(Args, Debug)]
pub struct LaunchTarget {
    /// Working directory for the process
    #[arg(long)]
    pub cwd: Option<String>,

    /// Environment overrides in KEY=VALUE format
    #[arg(short = 'e', long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Program to launch
    #[arg(required = true)]
    pub program: String,

    /// Arguments passed to the program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl LaunchTarget {
    /// Convert env overrides to a HashMap
    pub fn env_as_map(&self) -> HashMap<String, String> {
        self.env.iter().cloned().collect()
    }

    /// Quote the arguments back into a single argument string
    pub fn argument_string(&self) -> String {
        shell_words::join(&self.args)
    }
}

/// Arguments for the `run` subcommand
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Overall timeout in milliseconds (defaults to config)
    #[arg(short, long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    #[command(flatten)]
    pub target: LaunchTarget,
}

/// Arguments for the `spawn` subcommand
#[derive(Parser, Debug)]
pub struct SpawnArgs {
    /// Startup timeout in milliseconds (defaults to config)
    #[arg(long = "startup-timeout-ms")]
    pub startup_timeout_ms: Option<u64>,

    /// Run timeout in milliseconds, 0 for unbounded (defaults to config)
    #[arg(long = "run-timeout-ms")]
    pub run_timeout_ms: Option<u64>,

    /// Print progress every N milliseconds while running (0 = off)
    #[arg(long = "poll-ms", default_value = "0")]
    pub poll_ms: u64,

    #[command(flatten)]
    pub target: LaunchTarget,
}

/// Arguments for the `profile` subcommand
#[derive(Parser, Debug)]
pub struct ProfileArgs {
    /// Profile name from the configuration
    #[arg(required = true)]
    pub name: String,

    /// Run under supervision instead of blocking
    #[arg(long = "async")]
    pub run_async: bool,

    /// Print progress every N milliseconds while running (with --async)
    #[arg(long = "poll-ms", default_value = "0")]
    pub poll_ms: u64,
}

/// Parse KEY=VALUE argument
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid argument '{}': expected KEY=VALUE format", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable format
    Table,
    /// JSON output
    Json,
    /// Raw captured output only
    Plain,
}

/// Arguments for the `config` subcommand
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Show a single resolved profile instead of the whole configuration
    #[arg(short, long)]
    pub profile: Option<String>,
}
