//! The SDK entry point.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::auth::{AuthResolver, EnvSource, ProcessEnv};
use crate::cli::{
    CommandBuilder, OutputStream, ProcessInvocation, ProcessRunner, ProtocolUnit, StreamRecord,
};
use crate::config::{ClientConfig, ConfigLoader, ConfigOverrides, McpConfig, OutputFormat};
use crate::conversation::Conversation;
use crate::error::{Error, ExecutionError, Result};

/// A complete agent response, shaped by the output format.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Plain text output.
    Text(String),
    /// The single JSON document of `json` mode.
    Json(serde_json::Value),
    /// Every record of a `stream-json` run, in order.
    Records(Vec<StreamRecord>),
}

impl Response {
    /// Drain a unit stream into a response for `format`.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields, or `Error::Execution` if a
    /// JSON run produced no document.
    pub async fn collect<S>(format: OutputFormat, mut units: S) -> Result<Self>
    where
        S: Stream<Item = Result<ProtocolUnit>> + Unpin,
    {
        match format {
            OutputFormat::Text => {
                let mut text = String::new();
                while let Some(unit) = units.next().await {
                    if let ProtocolUnit::Text(fragment) = unit? {
                        text.push_str(&fragment);
                    }
                }
                Ok(Self::Text(text))
            }
            OutputFormat::Json => {
                let mut document = None;
                while let Some(unit) = units.next().await {
                    if let Some(record) = unit?.into_record() {
                        document = Some(record.into_value());
                    }
                }
                document.map(Self::Json).ok_or_else(|| {
                    Error::Execution(ExecutionError::new("Agent produced no JSON response"))
                })
            }
            OutputFormat::StreamJson => {
                let mut records = Vec::new();
                while let Some(unit) = units.next().await {
                    records.extend(unit?.into_record());
                }
                Ok(Self::Records(records))
            }
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The final answer: the text itself, or the `result` field of the JSON
    /// document or the last `result` record.
    #[must_use]
    pub fn result_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(value) => value.get("result").and_then(serde_json::Value::as_str),
            Self::Records(records) => records
                .iter()
                .rev()
                .find(|record| record.record_type() == Some("result"))
                .and_then(|record| record.get("result"))
                .and_then(serde_json::Value::as_str),
        }
    }
}

/// Shared plumbing for one configuration snapshot: builds, authenticates and
/// spawns invocations.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    config: Arc<ClientConfig>,
    env: Arc<dyn EnvSource + Send + Sync>,
    runner: ProcessRunner,
}

impl Dispatcher {
    fn new(config: ClientConfig, env: Arc<dyn EnvSource + Send + Sync>) -> Self {
        let runner = ProcessRunner::new(config.terminate_grace);
        Self {
            config: Arc::new(config),
            env,
            runner,
        }
    }

    fn with_config(&self, config: ClientConfig) -> Self {
        Self::new(config, Arc::clone(&self.env))
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn command(&self, prompt: &str) -> CommandBuilder {
        CommandBuilder::from_config(&self.config, prompt)
    }

    /// Validate the builder, then resolve credentials against the environment.
    pub(crate) fn invocation(&self, builder: &CommandBuilder) -> Result<ProcessInvocation> {
        builder.build_with(|| AuthResolver::with_env(self.env.as_ref()).resolve(&self.config.auth))
    }

    pub(crate) fn spawn(&self, invocation: &ProcessInvocation) -> Result<OutputStream> {
        let running = self.runner.spawn_streaming(invocation)?;
        Ok(OutputStream::new(
            running,
            self.config.output_format,
            self.config.malformed_lines,
        ))
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

/// Client for the Claude Code agent.
///
/// A client holds an immutable configuration snapshot. Every call builds a
/// fresh invocation from it, so clients are cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct ClaudeCode {
    dispatcher: Dispatcher,
}

impl ClaudeCode {
    /// Create a client from a configuration snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the configuration is invalid or its MCP
    /// configuration file is unusable.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        if let Some(path) = &config.mcp_config {
            McpConfig::load(path)?;
        }
        Ok(Self {
            dispatcher: Dispatcher::new(config, Arc::new(ProcessEnv)),
        })
    }

    /// Create a client from the first configuration file `loader` finds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a file exists but cannot be parsed, or any
    /// error from [`new`](Self::new).
    pub fn from_loader(loader: &ConfigLoader) -> Result<Self> {
        Self::new(loader.load()?)
    }

    /// Resolve credential fallbacks from `env` instead of the process environment.
    #[must_use]
    pub fn with_env<E>(self, env: E) -> Self
    where
        E: EnvSource + Send + Sync + 'static,
    {
        let config = ClientConfig::clone(&self.dispatcher.config);
        Self {
            dispatcher: Dispatcher::new(config, Arc::new(env)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.dispatcher.config()
    }

    /// A new client with `overrides` applied on top of this one's snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the merged snapshot is invalid.
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Result<Self> {
        let config = self.config().merge(overrides)?;
        if let Some(path) = &overrides.mcp_config {
            McpConfig::load(path)?;
        }
        Ok(Self {
            dispatcher: self.dispatcher.with_config(config),
        })
    }

    /// A new client that passes the MCP configuration at `path` to the agent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the file is missing or malformed.
    pub fn with_mcp_config(&self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let servers = McpConfig::load(&path)?;
        tracing::debug!(
            path = %path.display(),
            servers = ?servers.server_names().collect::<Vec<_>>(),
            "Loaded MCP configuration"
        );
        let config = self.config().clone().with_mcp_config(path);
        Ok(Self {
            dispatcher: self.dispatcher.with_config(config),
        })
    }

    /// Run a one-shot prompt and wait for the complete response.
    ///
    /// # Errors
    ///
    /// Returns validation and authentication errors before spawning,
    /// `Error::Spawn` if the agent cannot start, and `Error::Execution` or
    /// `Error::Timeout` if it fails.
    pub async fn run_prompt(&self, prompt: &str) -> Result<Response> {
        let format = self.config().output_format;
        let output = self.stream_prompt(prompt)?;
        Response::collect(format, output).await
    }

    /// Run a one-shot prompt and decode its output as it arrives.
    ///
    /// Dropping the returned stream terminates the agent.
    ///
    /// # Errors
    ///
    /// Returns validation, authentication and spawn errors; failures of the
    /// running agent are yielded by the stream.
    pub fn stream_prompt(&self, prompt: &str) -> Result<OutputStream> {
        let builder = self.dispatcher.command(prompt);
        let invocation = self.dispatcher.invocation(&builder)?;
        self.dispatcher.spawn(&invocation)
    }

    /// Start a conversation, optionally with a caller-chosen id and overrides.
    ///
    /// The id doubles as the agent session id, so it must be a UUID.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `id` is not a UUID or the overrides
    /// produce an invalid snapshot.
    pub fn start_conversation(
        &self,
        id: Option<String>,
        overrides: &ConfigOverrides,
    ) -> Result<Conversation> {
        if let Some(id) = &id {
            Uuid::parse_str(id).map_err(|e| {
                Error::validation(format!("Conversation id must be a UUID: {id} ({e})"))
            })?;
        }
        let client = self.with_overrides(overrides)?;
        Ok(Conversation::new(client.dispatcher, id))
    }

    /// Start a conversation with a generated id and this client's snapshot.
    #[must_use]
    pub fn conversation(&self) -> Conversation {
        Conversation::new(self.dispatcher.clone(), None)
    }
}
