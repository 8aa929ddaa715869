//! Error taxonomy for the SDK.
//!
//! Every failure the crate raises is an [`Error`]. Validation and
//! authentication problems are detected before any process is spawned;
//! execution and timeout errors carry the diagnostic payload captured from
//! the agent process so callers can log or branch without re-running it.

use std::fmt;
use std::time::Duration;

use crate::cli::{ProcessOutcome, SpawnError};
use crate::config::ConfigError;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Root error type for all SDK operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required credential or provider setting could not be resolved.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Name of the missing field (e.g. `api_key`, `region`).
        field: &'static str,
        /// Human readable description.
        message: String,
    },

    /// Caller input violated an invariant.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The agent process failed or produced malformed output.
    #[error(transparent)]
    Execution(ExecutionError),

    /// The agent process exceeded its deadline and was terminated.
    #[error(transparent)]
    Timeout(TimeoutError),

    /// The agent binary could not be started.
    #[error("Failed to spawn agent process: {0}")]
    Spawn(#[from] SpawnError),

    /// A configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns the execution payload for both `Execution` and `Timeout` errors.
    #[must_use]
    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(err) => Some(err),
            Self::Timeout(err) => Some(&err.execution),
            _ => None,
        }
    }

    /// Returns true if the process was terminated by the timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Process-level failure with captured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionError {
    /// Summary of what went wrong.
    pub message: String,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Standard output captured so far.
    pub stdout: String,
    /// Standard error captured so far.
    pub stderr: String,
    /// The raw protocol line that failed to decode, if any.
    pub offending_line: Option<String>,
}

impl ExecutionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            offending_line: None,
        }
    }

    #[must_use]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    #[must_use]
    pub fn with_output(mut self, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self.stderr = stderr.into();
        self
    }

    #[must_use]
    pub fn with_offending_line(mut self, line: impl Into<String>) -> Self {
        self.offending_line = Some(line.into());
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Execution error: {}", self.message)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionError {}

/// The agent process ran past its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutError {
    /// Partial output captured before termination.
    pub execution: ExecutionError,
    /// The configured timeout that was exceeded.
    pub timeout: Duration,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timeout error: agent did not finish within {:.1}s",
            self.timeout.as_secs_f64()
        )
    }
}

impl std::error::Error for TimeoutError {}

impl std::ops::Deref for TimeoutError {
    type Target = ExecutionError;

    fn deref(&self) -> &Self::Target {
        &self.execution
    }
}

impl ProcessOutcome {
    /// Map the outcome onto the error taxonomy.
    ///
    /// A timed out process becomes [`Error::Timeout`] carrying the partial
    /// output, a non-zero (or signalled) exit becomes [`Error::Execution`].
    /// Successful outcomes are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` or `Error::Execution` as described above.
    pub fn into_result(self, timeout: Option<Duration>) -> Result<Self> {
        if self.timed_out {
            let timeout = timeout.unwrap_or(self.elapsed);
            let execution = ExecutionError::new(format!(
                "Claude Code timed out after {:.1}s",
                timeout.as_secs_f64()
            ))
            .with_exit_code(self.exit_code)
            .with_output(self.stdout_lossy(), self.stderr_lossy());
            return Err(Error::Timeout(TimeoutError { execution, timeout }));
        }

        if self.exit_code != Some(0) {
            let message = match self.exit_code {
                Some(code) => format!("Claude Code failed with exit code {code}"),
                None => "Claude Code was terminated by a signal".to_string(),
            };
            let execution = ExecutionError::new(message)
                .with_exit_code(self.exit_code)
                .with_output(self.stdout_lossy(), self.stderr_lossy());
            return Err(Error::Execution(execution));
        }

        Ok(self)
    }
}
