//! Agent process spawning and lifecycle control.
//!
//! [`ProcessRunner`] owns spawn, wait and termination of the agent process.
//! Both operating modes share one path: [`RunningProcess`] arms the
//! deadline at spawn, captures stderr on a background task and hands stdout
//! out chunk by chunk. Blocking mode simply drains it to completion.
//!
//! A [`RunningProcess`] that is dropped before it was reaped terminates its
//! child (SIGTERM, then SIGKILL after the grace period).

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::ProcessInvocation;
use crate::config::DEFAULT_TERMINATE_TIMEOUT;

/// How long to keep reading pipes after the child is gone.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

pub(super) const READ_BUFFER_SIZE: usize = 8192;

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Agent binary not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(err: io::Error, program: &PathBuf) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(program.clone()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.clone()),
            _ => Self::Io(err),
        }
    }
}

/// Everything observed about one finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// All stdout bytes captured.
    pub stdout: Vec<u8>,
    /// All stderr bytes captured.
    pub stderr: Vec<u8>,
    /// Time from spawn to reap.
    pub elapsed: Duration,
    /// Whether the process was terminated because its deadline passed.
    pub timed_out: bool,
}

impl ProcessOutcome {
    /// Returns true for a zero exit without timeout.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout decoded lossily as UTF-8.
    #[must_use]
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily as UTF-8.
    #[must_use]
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A spawned agent process.
#[derive(Debug)]
pub struct ClaudeProcess {
    child: Child,
}

impl ClaudeProcess {
    /// Spawn the process described by `invocation`.
    ///
    /// Stdin is closed, stdout and stderr are piped, and the invocation's
    /// environment is layered over the inherited one.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(invocation: &ProcessInvocation) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = invocation.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(command = %invocation.command_line(), "Spawning agent process");
        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(e, &invocation.program))?;

        Ok(Self { child })
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

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> io::Result<()> {
        if self.id().is_none() {
            // Process already exited
            return Ok(());
        }

        self.send_sigterm();
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(
                    pid = ?self.id(),
                    grace = ?timeout,
                    "Agent ignored SIGTERM, killing"
                );
                self.child.kill().await
            }
        }
    }

    #[cfg(unix)]
    fn send_sigterm(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);
        }
    }

    /// Terminate and reap without awaiting, for use from `Drop`.
    fn reap_in_background(mut self, grace: Duration) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        tracing::debug!(pid = ?self.id(), "Reaping abandoned agent process");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = self.graceful_terminate(grace).await {
                    tracing::warn!(error = %e, "Failed to terminate abandoned agent process");
                }
            });
        } else if let Err(e) = self.child.start_kill() {
            tracing::warn!(error = %e, "Failed to kill abandoned agent process");
        }
    }
}

/// Background capture of one output pipe into a shared buffer.
///
/// The buffer is shared so that partial output stays available when the
/// reader is abandoned mid-way.
#[derive(Debug, Default)]
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl OutputCapture {
    fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut reader = reader;
            let mut chunk = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        tracing::debug!(error = %e, "Output capture stopped");
                        break;
                    }
                }
            }
        });
        Self {
            buffer,
            task: Some(task),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait (bounded) for the reader to hit EOF, then return everything captured.
    async fn collect(&mut self, window: Duration) -> Vec<u8> {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(window, &mut task).await.is_err() {
                tracing::debug!("Output capture still open after drain window");
                task.abort();
            }
        }
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A live agent process with its deadline armed.
#[derive(Debug)]
pub struct RunningProcess {
    process: Option<ClaudeProcess>,
    stdout: Option<ChildStdout>,
    stderr: OutputCapture,
    started: Instant,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    grace: Duration,
    timed_out: bool,
}

impl RunningProcess {
    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.process.as_ref().and_then(ClaudeProcess::id)
    }

    /// The configured timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the deadline has fired.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Stderr captured so far.
    #[must_use]
    pub fn stderr_snapshot(&self) -> Vec<u8> {
        self.stderr.snapshot()
    }

    /// Read the next chunk of stdout.
    ///
    /// Returns `Ok(0)` at end of output. When the deadline passes the child
    /// is terminated, whatever it already wrote is drained, and then
    /// `Ok(0)` is returned; check [`timed_out`](Self::timed_out).
    ///
    /// # Errors
    ///
    /// Returns an error if reading the pipe fails.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let Some(stdout) = self.stdout.as_mut() else {
                return Ok(0);
            };
            let Some(deadline) = self.deadline else {
                return stdout.read(buf).await;
            };
            match tokio::time::timeout_at(deadline, stdout.read(buf)).await {
                Ok(result) => return result,
                Err(_) if self.timed_out => {
                    tracing::debug!("Drain window elapsed, closing stdout");
                    self.stdout = None;
                    return Ok(0);
                }
                Err(_) => self.expire().await,
            }
        }
    }

    async fn expire(&mut self) {
        self.timed_out = true;
        tracing::warn!(
            pid = ?self.id(),
            timeout = ?self.timeout,
            "Agent process timed out, terminating"
        );
        if let Some(process) = self.process.as_mut() {
            if let Err(e) = process.graceful_terminate(self.grace).await {
                tracing::warn!(error = %e, "Failed to terminate timed out agent process");
            }
        }
        self.deadline = Some(Instant::now() + DRAIN_TIMEOUT);
    }

    /// Reap the process and assemble its outcome.
    ///
    /// `stdout` is the output the caller consumed through
    /// [`read_chunk`](Self::read_chunk).
    ///
    /// # Errors
    ///
    /// Returns an error if waiting for the process fails.
    pub async fn finish(mut self, stdout: Vec<u8>) -> io::Result<ProcessOutcome> {
        self.stdout = None;
        let Some(mut process) = self.process.take() else {
            return Err(io::Error::other("agent process already reaped"));
        };

        let status = match self.deadline {
            Some(deadline) if !self.timed_out => {
                let waited = tokio::time::timeout_at(deadline, process.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        self.timed_out = true;
                        tracing::warn!(
                            pid = ?process.id(),
                            "Agent process timed out after closing stdout"
                        );
                        process.graceful_terminate(self.grace).await?;
                        process.wait().await?
                    }
                }
            }
            _ => process.wait().await?,
        };

        let stderr = self.stderr.collect(DRAIN_TIMEOUT).await;
        let outcome = ProcessOutcome {
            exit_code: status.code(),
            stdout,
            stderr,
            elapsed: self.started.elapsed(),
            timed_out: self.timed_out,
        };
        tracing::debug!(
            exit_code = ?outcome.exit_code,
            timed_out = outcome.timed_out,
            elapsed = ?outcome.elapsed,
            "Agent process finished"
        );
        Ok(outcome)
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            process.reap_in_background(self.grace);
        }
    }
}

/// Runs agent invocations.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TERMINATE_TIMEOUT)
    }
}

impl ProcessRunner {
    /// Create a runner with the given SIGTERM-to-SIGKILL grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// The grace period used when terminating.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Spawn the invocation and return a handle for incremental reading.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_streaming(
        &self,
        invocation: &ProcessInvocation,
    ) -> Result<RunningProcess, SpawnError> {
        let mut process = ClaudeProcess::spawn(invocation)?;
        let started = Instant::now();
        let stdout = process.take_stdout();
        let stderr = process
            .take_stderr()
            .map(OutputCapture::spawn)
            .unwrap_or_default();

        Ok(RunningProcess {
            process: Some(process),
            stdout,
            stderr,
            started,
            deadline: invocation.timeout.map(|t| started + t),
            timeout: invocation.timeout,
            grace: self.grace,
            timed_out: false,
        })
    }

    /// Spawn the invocation and wait for it to exit or time out.
    ///
    /// A timeout is reported through [`ProcessOutcome::timed_out`], not as an
    /// error; the partial output is kept.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn or its pipes fail.
    pub async fn run(
        &self,
        invocation: &ProcessInvocation,
    ) -> Result<ProcessOutcome, SpawnError> {
        let mut running = self.spawn_streaming(invocation)?;
        let mut stdout = Vec::new();
        let mut chunk = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = running.read_chunk(&mut chunk).await?;
            if n == 0 {
                break;
            }
            stdout.extend_from_slice(&chunk[..n]);
        }
        Ok(running.finish(stdout).await?)
    }
}
