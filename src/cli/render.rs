//! Rendering of run outcomes for the terminal

use colored::Colorize;
use serde::Serialize;

use super::commands::OutputFormat;
use crate::error::{suggest_fix, ErrorInfo, ProcessError};
use crate::executor::{ExecutionResult, RunnerState};

/// JSON document printed for `--format json`
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RunnerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub result: &'a ExecutionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Short human status line for a finished run
pub fn status_line(command: &str, result: &ExecutionResult) -> String {
    let duration_ms = result.duration.as_millis();
    if result.is_timeout {
        format!("{}: {} after {}ms", "timeout".yellow().bold(), command, duration_ms)
    } else if result.is_success {
        format!("{}: {} in {}ms", "success".green(), command, duration_ms)
    } else {
        format!(
            "{}: {} exited with code {} after {}ms",
            "failed".red(),
            command,
            result.exit_code,
            duration_ms
        )
    }
}

/// Print captured output and the outcome in the requested format
pub fn print_outcome(
    format: OutputFormat,
    report: &RunReport<'_>,
    verbose: bool,
) -> anyhow::Result<()> {
    let result = report.result;
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Plain => {
            print!("{}", result.output_text);
            eprint!("{}", result.error_text);
        }
        OutputFormat::Table => {
            print!("{}", result.output_text);
            eprint!("{}", result.error_text);
            if result.stdout_truncated || result.stderr_truncated {
                eprintln!("{}: captured output was truncated", "note".cyan());
            }
            if verbose || !result.is_success {
                eprintln!("{}", status_line(report.command, result));
            }
            if let Some(ref info) = report.error {
                if let Some(ref suggestion) = info.suggestion {
                    eprintln!("{}: {}", "hint".cyan(), suggestion);
                }
            }
        }
    }
    Ok(())
}

/// Error details for a report, with a suggestion derived from stderr when
/// the error itself carries none
pub fn error_info(program: &str, error: Option<&ProcessError>, stderr: &str) -> Option<ErrorInfo> {
    match error {
        Some(e) => {
            let mut info = ErrorInfo::from(e);
            if info.suggestion.is_none() {
                info.suggestion = suggest_fix(program, stderr);
            }
            Some(info)
        }
        None => suggest_fix(program, stderr).map(|suggestion| ErrorInfo {
            message: format!("{} reported an error", program),
            error_type: "process_error".to_string(),
            suggestion: Some(suggestion),
        }),
    }
}

/// Process exit code for the CLI itself
pub fn exit_status(result: &ExecutionResult) -> u8 {
    if result.is_success {
        0
    } else if result.is_timeout {
        124
    } else if (1..=255).contains(&result.exit_code) {
        result.exit_code as u8
    } else {
        1
    }
}
