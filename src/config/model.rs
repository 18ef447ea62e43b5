//! Configuration model for proclaunch
//!
//! Defines the structure for XDG-compliant layered configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::executor::{AsyncProcessRunner, StartConfiguration, SynchronousProcessRunner};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Default settings applied to every launch
    #[serde(default)]
    pub defaults: Defaults,

    /// Environment overrides applied to every launch
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Named launch profiles
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

/// Default settings applied to every launch
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Overall timeout for synchronous runs, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Bound on how long a launch may take, in milliseconds
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Run timeout for async runs in milliseconds (0 = unbounded)
    #[serde(default)]
    pub run_timeout_ms: u64,

    /// Per-stream capture limit in bytes (0 = unbounded)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// How long to keep draining output after an async process exits
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_drain_grace_ms() -> u64 {
    2_000
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            run_timeout_ms: 0,
            max_output_bytes: default_max_output_bytes(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

/// A named launch profile
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProfileConfig {
    /// Executable path or name
    pub executable: String,

    /// Argument string, split with shell-word rules
    #[serde(default)]
    pub arguments: String,

    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment overrides for this profile (win over `[env]`)
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Sync timeout override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Startup timeout override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout_ms: Option<u64>,

    /// Run timeout override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_ms: Option<u64>,
}

/// Fully resolved launch settings (after applying defaults)
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedLaunch {
    pub name: String,
    pub executable: String,
    pub arguments: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout_ms: u64,
    pub startup_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub max_output_bytes: usize,
    pub drain_grace_ms: u64,
}

impl ResolvedLaunch {
    /// Build the start configuration for this launch
    pub fn start_configuration(&self) -> StartConfiguration {
        let mut config = StartConfiguration::new(&self.executable)
            .with_arguments(&self.arguments)
            .with_envs(self.env.clone());
        if let Some(ref dir) = self.working_dir {
            config = config.in_dir(dir);
        }
        config
    }

    /// Blocking runner configured from these settings
    pub fn sync_runner(&self) -> SynchronousProcessRunner {
        SynchronousProcessRunner::new(self.start_configuration())
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_output(self.max_output_bytes)
    }

    /// Non-blocking runner configured from these settings
    pub fn async_runner(&self) -> AsyncProcessRunner {
        AsyncProcessRunner::with_output_limit(self.start_configuration(), self.max_output_bytes)
            .with_startup_timeout(Duration::from_millis(self.startup_timeout_ms))
            .with_run_timeout(Duration::from_millis(self.run_timeout_ms))
            .with_drain_grace(Duration::from_millis(self.drain_grace_ms))
    }
}

impl Config {
    /// Resolve an ad-hoc launch (not from a profile) against the defaults
    pub fn resolve_command(&self, executable: &str, arguments: &str) -> ResolvedLaunch {
        ResolvedLaunch {
            name: executable.to_string(),
            executable: executable.to_string(),
            arguments: arguments.to_string(),
            working_dir: None,
            env: self.env.clone(),
            timeout_ms: self.defaults.timeout_ms,
            startup_timeout_ms: self.defaults.startup_timeout_ms,
            run_timeout_ms: self.defaults.run_timeout_ms,
            max_output_bytes: self.defaults.max_output_bytes,
            drain_grace_ms: self.defaults.drain_grace_ms,
        }
    }

    /// Resolve a named profile against the defaults
    pub fn get_profile(&self, name: &str) -> Option<ResolvedLaunch> {
        let profile = self.profiles.get(name)?;

        let mut env = self.env.clone();
        env.extend(profile.env.clone());

        Some(ResolvedLaunch {
            name: name.to_string(),
            executable: profile.executable.clone(),
            arguments: profile.arguments.clone(),
            working_dir: profile.working_dir.clone(),
            env,
            timeout_ms: profile.timeout_ms.unwrap_or(self.defaults.timeout_ms),
            startup_timeout_ms: profile
                .startup_timeout_ms
                .unwrap_or(self.defaults.startup_timeout_ms),
            run_timeout_ms: profile.run_timeout_ms.unwrap_or(self.defaults.run_timeout_ms),
            max_output_bytes: self.defaults.max_output_bytes,
            drain_grace_ms: self.defaults.drain_grace_ms,
        })
    }

    /// List all configured profile names, sorted
    pub fn list_profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a profile is configured
    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }
}
