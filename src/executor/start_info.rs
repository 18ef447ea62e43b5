//! Launch configuration for a child process
//!
//! A `StartConfiguration` describes what to run. Runners take ownership of it
//! and always force their own stdio redirection onto it, so a caller can never
//! launch a process whose output the runner cannot see.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::ProcessError;

/// What to launch and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartConfiguration {
    executable: PathBuf,
    arguments: String,
    working_dir: Option<PathBuf>,
    env: HashMap<String, String>,
    redirect_stdout: bool,
    redirect_stderr: bool,
    use_shell: bool,
    create_no_window: bool,
}

impl StartConfiguration {
    /// Create a configuration for an executable with no arguments
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            arguments: String::new(),
            working_dir: None,
            env: HashMap::new(),
            redirect_stdout: false,
            redirect_stderr: false,
            use_shell: false,
            create_no_window: false,
        }
    }

    /// Set the argument string (split with POSIX shell-word rules at launch)
    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    /// Build the argument string from discrete arguments, quoting as needed
    pub fn with_args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = shell_words::join(args.into_iter().map(|a| a.as_ref().to_string()));
        self.with_arguments(joined)
    }

    /// Set the working directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable override
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variable overrides
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.env.insert(key.into(), value.into());
        }
        self
    }

    /// Force the flags every runner requires. Called by runner constructors.
    pub(crate) fn redirected(mut self) -> Self {
        self.redirect_stdout = true;
        self.redirect_stderr = true;
        self.use_shell = false;
        self.create_no_window = true;
        self
    }

    pub fn executable(&self) -> &std::path::Path {
        &self.executable
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    pub fn working_dir(&self) -> Option<&std::path::Path> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn redirects_stdout(&self) -> bool {
        self.redirect_stdout
    }

    pub fn redirects_stderr(&self) -> bool {
        self.redirect_stderr
    }

    pub fn uses_shell(&self) -> bool {
        self.use_shell
    }

    pub fn creates_no_window(&self) -> bool {
        self.create_no_window
    }

    /// Human-readable command line for logs and error messages
    pub fn display_command(&self) -> String {
        if self.arguments.is_empty() {
            self.executable.display().to_string()
        } else {
            format!("{} {}", self.executable.display(), self.arguments)
        }
    }

    /// Split the argument string into argv
    pub fn argv(&self) -> Result<Vec<String>, ProcessError> {
        shell_words::split(&self.arguments).map_err(|e| ProcessError::InvalidArguments {
            program: self.executable.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Build the tokio command for this configuration
    ///
    /// The child gets its own process group on Unix so the whole tree can be
    /// signalled at once, and is killed if its handle is dropped.
    pub(crate) fn to_command(&self) -> Result<Command, ProcessError> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.argv()?);
        cmd.stdin(Stdio::null());
        if self.redirect_stdout {
            cmd.stdout(Stdio::piped());
        }
        if self.redirect_stderr {
            cmd.stderr(Stdio::piped());
        }
        cmd.kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        if self.create_no_window {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        Ok(cmd)
    }
}
