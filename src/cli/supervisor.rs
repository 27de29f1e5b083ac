//! Deadline-bounded execution of one Claude Code process.
//!
//! [`ProcessSupervisor::run`] spawns the process, drains stdout and stderr
//! continuously, feeds stdout through a [`StreamJsonExtractor`] and waits for
//! the first of: natural exit, early resolution, deadline, or cancellation.
//! Every path that leaves the process alive goes through the same
//! terminate-then-kill escalation, with both pipes still being read during
//! the grace window, so the process has exited before `run` returns.

use std::borrow::Cow;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    ClaudeCommand, Escalation, ExtractedValue, KillState, ProcessHandle, SpawnError,
    StreamJsonExtractor,
};

/// Default wall-clock limit for a single attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace window between terminate and kill.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// Default cap on captured bytes per stream.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to keep draining pipes after the process has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8 * 1024;

/// Limits applied to every supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// Wall-clock deadline per attempt.
    pub timeout: Duration,
    /// Wait between the terminate signal and the forced kill.
    pub kill_grace: Duration,
    /// Maximum bytes captured per stream; the rest is discarded.
    pub max_output_bytes: usize,
    /// Terminate the process as soon as stdout yields a complete object.
    pub terminate_on_resolve: bool,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            terminate_on_resolve: true,
        }
    }
}

/// Bytes captured from the process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Some output was discarded because a stream hit the capture cap.
    pub truncated: bool,
}

impl CapturedOutput {
    /// Stdout decoded lossily.
    #[must_use]
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded lossily.
    #[must_use]
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// A process that ran to an exit we accept as complete.
#[derive(Debug, Clone)]
pub struct CompletedProcess {
    /// Exit code, `None` if terminated by a signal.
    pub exit_code: Option<i32>,
    /// Whether the exit status reported success.
    pub success: bool,
    pub output: CapturedOutput,
    /// Value recovered from stdout.
    pub value: ExtractedValue,
    /// The process was stopped by us after stdout resolved.
    pub terminated_early: bool,
}

/// Terminal state of a supervised run.
#[derive(Debug)]
pub enum ProcessOutcome {
    Completed(CompletedProcess),
    SpawnFailed(SpawnError),
    TimedOut(CapturedOutput),
    Cancelled(CapturedOutput),
    WaitFailed(std::io::Error),
}

/// Everything known about a finished supervised run.
#[derive(Debug)]
pub struct ProcessReport {
    /// Process ID, `None` if the spawn failed.
    pub pid: Option<u32>,
    /// Kill-lifecycle state when `run` returned, `None` if never spawned.
    pub final_state: Option<KillState>,
    pub escalation: Escalation,
    pub elapsed: Duration,
    pub outcome: ProcessOutcome,
}

enum Ending {
    Exited(std::io::Result<std::process::ExitStatus>),
    Resolved,
    TimedOut,
    Cancelled,
}

enum Pipe {
    Stdout,
    Stderr,
}

/// Continuous reader for both output pipes.
struct OutputPump {
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    out_buf: Vec<u8>,
    err_buf: Vec<u8>,
    output: CapturedOutput,
    extractor: StreamJsonExtractor,
    max_bytes: usize,
}

impl OutputPump {
    fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>, max_bytes: usize) -> Self {
        Self {
            stdout,
            stderr,
            out_buf: vec![0; READ_CHUNK],
            err_buf: vec![0; READ_CHUNK],
            output: CapturedOutput::default(),
            extractor: StreamJsonExtractor::new(),
            max_bytes,
        }
    }

    fn is_open(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    /// Read one chunk from whichever pipe is ready.
    ///
    /// Pends forever once both pipes are closed. Returns whether stdout has
    /// resolved to an object.
    async fn pump(&mut self) -> bool {
        let (pipe, read) = tokio::select! {
            read = read_chunk(self.stdout.as_mut(), &mut self.out_buf) => (Pipe::Stdout, read),
            read = read_chunk(self.stderr.as_mut(), &mut self.err_buf) => (Pipe::Stderr, read),
        };

        match (pipe, read) {
            (Pipe::Stdout, Ok(n)) if n > 0 => {
                let kept = append_capped(
                    &mut self.output.stdout,
                    &self.out_buf[..n],
                    self.max_bytes,
                    &mut self.output.truncated,
                );
                self.extractor.push(&self.out_buf[..kept]);
            }
            (Pipe::Stderr, Ok(n)) if n > 0 => {
                append_capped(
                    &mut self.output.stderr,
                    &self.err_buf[..n],
                    self.max_bytes,
                    &mut self.output.truncated,
                );
            }
            (Pipe::Stdout, result) => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "stdout read failed");
                }
                self.stdout = None;
            }
            (Pipe::Stderr, result) => {
                if let Err(e) = result {
                    tracing::debug!(error = %e, "stderr read failed");
                }
                self.stderr = None;
            }
        }

        self.extractor.is_resolved()
    }

    /// Read whatever is left in the pipes, bounded by [`DRAIN_TIMEOUT`].
    async fn drain(&mut self) {
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.is_open() {
                self.pump().await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::debug!("Output pipes still open after exit, abandoning drain");
            self.stdout = None;
            self.stderr = None;
        }
    }

    fn finish(self) -> (CapturedOutput, ExtractedValue) {
        (self.output, self.extractor.finish())
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    pipe: Option<&mut R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Append up to the cap and return how many bytes were kept.
fn append_capped(dst: &mut Vec<u8>, src: &[u8], cap: usize, truncated: &mut bool) -> usize {
    let room = cap.saturating_sub(dst.len());
    let kept = src.len().min(room);
    if kept < src.len() && !*truncated {
        tracing::warn!(cap, "Process output exceeded capture limit, discarding the rest");
        *truncated = true;
    }
    dst.extend_from_slice(&src[..kept]);
    kept
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs one process at a time under [`ProcessLimits`].
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor {
    limits: ProcessLimits,
}

impl ProcessSupervisor {
    /// Create a supervisor with the given limits.
    #[must_use]
    pub fn new(limits: ProcessLimits) -> Self {
        Self { limits }
    }

    /// Get the configured limits.
    #[must_use]
    pub fn limits(&self) -> &ProcessLimits {
        &self.limits
    }

    /// Run `command` to completion, deadline, or cancellation.
    ///
    /// Cancelling `cancel` terminates the process through the same
    /// escalation path as the deadline.
    pub async fn run(&self, command: &ClaudeCommand, cancel: &CancellationToken) -> ProcessReport {
        let started = Instant::now();

        let mut handle = match ProcessHandle::spawn(command) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    binary = %command.get_binary().display(),
                    error = %e,
                    "Failed to spawn Claude process"
                );
                return ProcessReport {
                    pid: None,
                    final_state: None,
                    escalation: Escalation::default(),
                    elapsed: started.elapsed(),
                    outcome: ProcessOutcome::SpawnFailed(e),
                };
            }
        };

        let pid = handle.id();
        tracing::debug!(
            pid = ?pid,
            binary = %command.get_binary().display(),
            prompt_len = command.prompt().len(),
            "Spawned Claude process"
        );

        let mut pump = OutputPump::new(
            handle.take_stdout(),
            handle.take_stderr(),
            self.limits.max_output_bytes,
        );
        let deadline = tokio::time::sleep(self.limits.timeout);
        tokio::pin!(deadline);

        let ending = loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break Ending::Cancelled,
                () = &mut deadline => break Ending::TimedOut,
                status = handle.wait() => break Ending::Exited(status),
                resolved = pump.pump() => {
                    if resolved && self.limits.terminate_on_resolve {
                        break Ending::Resolved;
                    }
                }
            }
        };

        let outcome = match ending {
            Ending::Exited(Ok(status)) => {
                handle.reap_stragglers();
                pump.drain().await;
                let (output, value) = pump.finish();
                tracing::debug!(pid = ?pid, code = ?status.code(), "Claude process exited");
                ProcessOutcome::Completed(CompletedProcess {
                    exit_code: status.code(),
                    success: status.success(),
                    output,
                    value,
                    terminated_early: false,
                })
            }
            Ending::Exited(Err(e)) => {
                tracing::error!(pid = ?pid, error = %e, "Failed to wait on Claude process");
                self.shutdown(&mut handle, &mut pump).await;
                ProcessOutcome::WaitFailed(e)
            }
            Ending::Resolved => {
                tracing::debug!(pid = ?pid, "Output resolved, stopping process early");
                let status = self.shutdown(&mut handle, &mut pump).await;
                pump.drain().await;
                let (output, value) = pump.finish();
                ProcessOutcome::Completed(CompletedProcess {
                    exit_code: status.as_ref().and_then(std::process::ExitStatus::code),
                    success: status.is_some_and(|s| s.success()),
                    output,
                    value,
                    terminated_early: true,
                })
            }
            Ending::TimedOut => {
                tracing::warn!(
                    pid = ?pid,
                    timeout_ms = millis(self.limits.timeout),
                    "Claude process exceeded deadline, terminating"
                );
                self.shutdown(&mut handle, &mut pump).await;
                pump.drain().await;
                ProcessOutcome::TimedOut(pump.finish().0)
            }
            Ending::Cancelled => {
                tracing::info!(pid = ?pid, "Attempt cancelled, terminating Claude process");
                self.shutdown(&mut handle, &mut pump).await;
                pump.drain().await;
                ProcessOutcome::Cancelled(pump.finish().0)
            }
        };

        ProcessReport {
            pid,
            final_state: Some(handle.state()),
            escalation: handle.escalation(),
            elapsed: started.elapsed(),
            outcome,
        }
    }

    /// Terminate, then kill after the grace window, reading output until exit.
    async fn shutdown(
        &self,
        handle: &mut ProcessHandle,
        pump: &mut OutputPump,
    ) -> Option<std::process::ExitStatus> {
        handle.begin_terminate();
        let grace = tokio::time::sleep(self.limits.kill_grace);
        tokio::pin!(grace);
        let mut killed = false;

        let waited = loop {
            tokio::select! {
                biased;

                status = handle.wait() => break status,
                () = &mut grace, if !killed => {
                    tracing::warn!(
                        pid = ?handle.id(),
                        grace_ms = millis(self.limits.kill_grace),
                        "Process survived terminate signal, sending kill"
                    );
                    handle.force_kill();
                    killed = true;
                }
                _ = pump.pump() => {}
            }
        };

        match waited {
            Ok(status) => {
                handle.reap_stragglers();
                Some(status)
            }
            Err(e) => {
                tracing::error!(pid = ?handle.id(), error = %e, "Failed to terminate Claude process");
                None
            }
        }
    }
}
