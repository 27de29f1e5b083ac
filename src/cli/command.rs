//! Argument-vector construction for the Claude Code CLI.
//!
//! The prompt always travels as one discrete `argv` entry handed straight to
//! process creation. No shell is involved, so quotes, `$`, backticks and
//! newlines in user text reach the CLI byte-for-byte.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

/// Default executable name, resolved through the inherited `PATH`.
pub const DEFAULT_CLAUDE_BINARY: &str = "claude";

/// Builder for a single Claude Code invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCommand {
    binary: PathBuf,
    prompt: String,
    skip_permissions: bool,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ClaudeCommand {
    /// Create a new command for the given prompt using the default binary.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CLAUDE_BINARY),
            prompt: prompt.into(),
            skip_permissions: true,
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Copy this command's settings for a different prompt.
    #[must_use]
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }

    /// Use a specific executable path.
    #[must_use]
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Toggle `--dangerously-skip-permissions`.
    #[must_use]
    pub fn skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a variable on top of the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Get the executable path.
    #[must_use]
    pub fn get_binary(&self) -> &Path {
        &self.binary
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the environment overlay.
    #[must_use]
    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.prompt.clone()];

        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        args.push("--output-format".to_string());
        args.push("json".to_string());
        args
    }

    /// Produce a ready-to-spawn tokio command.
    ///
    /// Stdin is closed, stdout and stderr are piped, and on unix the child
    /// leads its own process group so signals can reach its descendants.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(self.build_args())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}
