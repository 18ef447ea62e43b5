//! CLI module for proclaunch
//!
//! Provides command-line interface with the following subcommands:
//! - `run` - Run a program to completion with a single timeout
//! - `spawn` - Run a program under supervision
//! - `profile` - Run a configured launch profile
//! - `config` - Show configuration

pub mod commands;
pub mod render;

pub use commands::{Cli, Commands, OutputFormat};
