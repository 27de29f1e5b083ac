//! Ownership of a single spawned Claude Code process.
//!
//! A [`ProcessHandle`] tracks where the child is in its kill lifecycle and
//! performs the terminate-then-kill escalation. On unix the child leads its
//! own process group, so signals are delivered to the whole group.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, ChildStderr, ChildStdout};

use super::ClaudeCommand;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Claude binary not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied executing {0}")]
    PermissionDenied(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: std::io::Error, binary: PathBuf) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary),
            _ => Self::Io(err),
        }
    }
}

/// Lifecycle of a process with respect to termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KillState {
    Running,
    Terminating,
    Killed,
    Exited,
}

/// Signals sent to a process during its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Escalation {
    /// A graceful terminate signal was sent.
    pub terminate_sent: bool,
    /// A forced kill was sent after the grace window.
    pub kill_sent: bool,
}

/// A running Claude Code process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    state: KillState,
    escalation: Escalation,
}

impl ProcessHandle {
    /// Spawn the process described by `command`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(command: &ClaudeCommand) -> Result<Self, SpawnError> {
        let child = command
            .to_command()
            .spawn()
            .map_err(|e| SpawnError::from_io(e, command.get_binary().to_path_buf()))?;
        let pid = child.id();

        Ok(Self {
            child,
            pid,
            state: KillState::Running,
            escalation: Escalation::default(),
        })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Process ID assigned at spawn.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Current kill-lifecycle state.
    #[must_use]
    pub fn state(&self) -> KillState {
        self.state
    }

    /// Signals sent so far.
    #[must_use]
    pub fn escalation(&self) -> Escalation {
        self.escalation
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.state = KillState::Exited;
        }
        Ok(status)
    }

    /// Wait for the process to exit.
    ///
    /// Cancel-safe: dropping the future leaves the handle usable.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.state = KillState::Exited;
        Ok(status)
    }

    /// Send the graceful terminate signal to a running process.
    ///
    /// Does nothing once termination has started or the process has exited.
    pub fn begin_terminate(&mut self) {
        if self.state != KillState::Running {
            return;
        }
        self.send_terminate();
        self.state = KillState::Terminating;
        self.escalation.terminate_sent = true;
    }

    /// Force-kill a process that has not exited yet.
    pub fn force_kill(&mut self) {
        if matches!(self.state, KillState::Exited | KillState::Killed) {
            return;
        }
        self.send_kill();
        self.state = KillState::Killed;
        self.escalation.kill_sent = true;
    }

    /// Terminate with escalation: graceful signal, wait `grace`, then force kill.
    ///
    /// Returns only once the process has actually exited. Nothing reads the
    /// output pipes meanwhile; callers that own the pipes should drive
    /// [`begin_terminate`](Self::begin_terminate) and
    /// [`force_kill`](Self::force_kill) themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the process fails.
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        if self.state == KillState::Exited {
            return self.child.wait().await;
        }

        self.begin_terminate();
        if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
            return result;
        }

        tracing::warn!(
            pid = ?self.pid,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "Process survived terminate signal, sending kill"
        );
        self.force_kill();
        self.wait().await
    }

    /// Kill anything left in the process group after the leader exited.
    pub fn reap_stragglers(&self) {
        #[cfg(unix)]
        {
            if self.state == KillState::Exited {
                self.signal_group(nix::sys::signal::Signal::SIGKILL);
            }
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> bool {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        let pgid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
        killpg(pgid, signal).is_ok()
    }

    fn send_terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            tracing::debug!(pid = ?self.pid, "Sending SIGTERM");
            if !self.signal_group(Signal::SIGTERM) {
                if let Some(pid) = self.pid {
                    let _ = kill(
                        Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)),
                        Signal::SIGTERM,
                    );
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }

    fn send_kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);

        let _ = self.child.start_kill();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.state != KillState::Exited {
            tracing::debug!(pid = ?self.pid, state = ?self.state, "Killing process on drop");
            self.send_kill();
        }
    }
}
