//! Configuration value interpolation
//!
//! Supports environment variable and shell command interpolation in config values:
//! - `$VAR` or `${VAR}` - Environment variable substitution
//! - `$(command)` - Shell command execution
//!
//! # Security Note
//!
//! Shell command execution runs with the current user's permissions.
//! Config files should have restricted permissions (600) to prevent
//! unauthorized command execution.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProcessError;
use crate::executor::{StartConfiguration, SynchronousProcessRunner};

/// Timeout for each `$(command)` evaluated during config loading
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

static COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\(([^)]+)\)").expect("Invalid regex"));
static BRACKETED_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid regex"));
static SIMPLE_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex"));

/// Interpolate a string with environment variables and shell commands
///
/// # Interpolation Syntax
///
/// - `$VAR` - Simple environment variable
/// - `${VAR}` - Environment variable with explicit boundaries
/// - `$(command)` - Shell command execution
///
/// # Examples
///
/// ```
/// use proclaunch::config::interpolate::interpolate_string;
///
/// std::env::set_var("MY_VAR", "hello");
/// let result = interpolate_string("Value: $MY_VAR");
/// assert_eq!(result, "Value: hello");
/// std::env::remove_var("MY_VAR");
/// ```
pub fn interpolate_string(s: &str) -> String {
    // Commands first, so their output is never re-read as variables
    let result = interpolate_commands(s);
    interpolate_env_vars(&result)
}

/// Interpolate shell commands: $(command)
fn interpolate_commands(s: &str) -> String {
    COMMAND_RE
        .replace_all(s, |caps: &regex::Captures| {
            let cmd = &caps[1];
            match execute_shell_command(cmd) {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!("Failed to execute config command '{}': {}", cmd, e);
                    // Return original on error so it's visible
                    format!("$({})_ERROR", cmd)
                }
            }
        })
        .to_string()
}

/// Interpolate environment variables: $VAR or ${VAR}
fn interpolate_env_vars(s: &str) -> String {
    let lookup = |caps: &regex::Captures| {
        let var = &caps[1];
        std::env::var(var).unwrap_or_else(|_| {
            tracing::debug!("Environment variable '{}' not set", var);
            String::new()
        })
    };

    // ${VAR} first (explicit boundaries), then $VAR
    let result = BRACKETED_VAR_RE.replace_all(s, lookup).to_string();
    SIMPLE_VAR_RE.replace_all(&result, lookup).to_string()
}

/// Execute a shell command through the synchronous runner and return its stdout
fn execute_shell_command(cmd: &str) -> Result<String, ProcessError> {
    let config = StartConfiguration::new("sh").with_args(["-c", cmd]);
    let mut runner = SynchronousProcessRunner::new(config).with_timeout(COMMAND_TIMEOUT);
    let result = runner.run()?;

    if result.is_success {
        Ok(result.output_text.trim().to_string())
    } else {
        Err(ProcessError::Config(format!(
            "Command failed with exit code {}: {}",
            result.exit_code,
            result.error_text.trim()
        )))
    }
}

/// Interpolate all string values in a Config
///
/// This applies interpolation to string fields that commonly contain
/// paths or dynamic values (profile paths, arguments, env values).
pub fn interpolate_config(config: &mut super::model::Config) {
    for value in config.env.values_mut() {
        *value = interpolate_string(value);
    }

    for profile in config.profiles.values_mut() {
        profile.executable = interpolate_string(&profile.executable);
        if let Some(ref mut dir) = profile.working_dir {
            *dir = interpolate_string(dir);
        }
        for value in profile.env.values_mut() {
            *value = interpolate_string(value);
        }
    }
}
