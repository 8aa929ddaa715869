//! Configuration types.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{AuthKind, AuthSettings};
use crate::error::{Error, Result};

/// Default agent binary, resolved through `PATH`.
pub const DEFAULT_BINARY: &str = "claude";

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Output protocol requested from the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Plain text on stdout.
    #[default]
    Text,
    /// A single JSON document on stdout.
    Json,
    /// Newline-delimited JSON records.
    StreamJson,
}

impl OutputFormat {
    /// Value passed to `--output-format`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "stream-json" | "stream_json" => Ok(Self::StreamJson),
            other => Err(Error::validation(format!("Unknown output format: {other}"))),
        }
    }
}

/// What to do with a stream-json line that is not a valid record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Fail the stream with an execution error naming the line.
    #[default]
    Error,
    /// Log a warning and continue with the next line.
    Skip,
}

/// Immutable configuration snapshot for the client and its conversations.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Authentication settings.
    pub auth: AuthSettings,
    /// Tools the agent may use.
    pub allowed_tools: Vec<String>,
    /// Tools the agent must not use.
    pub disallowed_tools: Vec<String>,
    /// Maximum turns per conversation; `None` is unbounded.
    pub max_turns: Option<u32>,
    /// Path to an MCP server configuration file.
    pub mcp_config: Option<PathBuf>,
    /// Per-invocation timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Output protocol for one-shot calls.
    pub output_format: OutputFormat,
    /// Agent executable.
    pub binary: PathBuf,
    /// Working directory for the agent process.
    pub working_dir: Option<PathBuf>,
    /// Handling of malformed stream-json lines.
    pub malformed_lines: MalformedLinePolicy,
    /// Grace period before a terminated process is killed.
    pub terminate_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            max_turns: None,
            mcp_config: None,
            timeout: None,
            output_format: OutputFormat::default(),
            binary: PathBuf::from(DEFAULT_BINARY),
            working_dir: None,
            malformed_lines: MalformedLinePolicy::default(),
            terminate_grace: DEFAULT_TERMINATE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given auth kind.
    #[must_use]
    pub fn new(kind: AuthKind) -> Self {
        Self {
            auth: AuthSettings::new(kind),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.auth.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.auth.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.auth.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.auth.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_disallowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    #[must_use]
    pub fn with_mcp_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.mcp_config = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_malformed_lines(mut self, policy: MalformedLinePolicy) -> Self {
        self.malformed_lines = policy;
        self
    }

    #[must_use]
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    /// Check the invariants that can be verified without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if a tool is both allowed and disallowed,
    /// or if `max_turns` is zero.
    pub fn validate(&self) -> Result<()> {
        check_tool_overlap(&self.allowed_tools, &self.disallowed_tools)?;

        if self.max_turns == Some(0) {
            return Err(Error::validation("max_turns must be at least 1"));
        }

        Ok(())
    }

    /// Produce a new snapshot with the overrides applied on top of `self`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the merged snapshot is invalid.
    pub fn merge(&self, overrides: &ConfigOverrides) -> Result<Self> {
        let mut merged = self.clone();
        if let Some(tools) = &overrides.allowed_tools {
            merged.allowed_tools.clone_from(tools);
        }
        if let Some(tools) = &overrides.disallowed_tools {
            merged.disallowed_tools.clone_from(tools);
        }
        if let Some(turns) = overrides.max_turns {
            merged.max_turns = Some(turns);
        }
        if let Some(path) = &overrides.mcp_config {
            merged.mcp_config = Some(path.clone());
        }
        if let Some(model) = &overrides.model {
            merged.auth.model = Some(model.clone());
        }
        if let Some(timeout) = overrides.timeout {
            merged.timeout = Some(timeout);
        }
        if let Some(format) = overrides.output_format {
            merged.output_format = format;
        }
        if let Some(dir) = &overrides.working_dir {
            merged.working_dir = Some(dir.clone());
        }
        merged.validate()?;
        Ok(merged)
    }
}

/// Tool names as the agent receives them: trimmed, with blanks dropped.
pub fn tool_names(tools: &[String]) -> impl Iterator<Item = &str> {
    tools.iter().map(|t| t.trim()).filter(|t| !t.is_empty())
}

/// Reject any tool named in both lists, comparing normalized names.
///
/// # Errors
///
/// Returns `Error::Validation` listing the overlapping tools in sorted order.
pub fn check_tool_overlap(allowed: &[String], disallowed: &[String]) -> Result<()> {
    let allowed: HashSet<&str> = tool_names(allowed).collect();
    let mut overlap: Vec<&str> = tool_names(disallowed)
        .filter(|tool| allowed.contains(tool))
        .collect();
    if overlap.is_empty() {
        return Ok(());
    }
    overlap.sort_unstable();
    overlap.dedup();
    Err(Error::validation(format!(
        "Tools cannot be both allowed and disallowed: {}",
        overlap.join(", ")
    )))
}

/// Per-conversation overrides; unset fields inherit from the base snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
    pub max_turns: Option<u32>,
    pub mcp_config: Option<PathBuf>,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
    pub output_format: Option<OutputFormat>,
    pub working_dir: Option<PathBuf>,
}
