//! Building agent invocations.
//!
//! [`CommandBuilder`] turns a configuration snapshot, a prompt and optional
//! session information into a [`ProcessInvocation`]: an argument vector plus
//! an environment overlay. Arguments are never passed through a shell.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{redacted_vars, AuthContext};
use crate::config::{
    check_tool_overlap, tool_names, ClientConfig, McpConfig, OutputFormat, DEFAULT_BINARY,
};
use crate::error::{Error, Result};

/// Environment variable carrying the conversation id to the agent.
pub const CONVERSATION_ID_ENV: &str = "CLAUDE_CONVERSATION_ID";

/// A concrete process invocation, built fresh for each call.
#[derive(Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    /// Executable to run.
    pub program: PathBuf,
    /// Argument vector, excluding the program.
    pub args: Vec<String>,
    /// Variables layered on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Working directory, if any.
    pub working_dir: Option<PathBuf>,
    /// Deadline measured from spawn.
    pub timeout: Option<Duration>,
}

impl ProcessInvocation {
    /// Create an invocation with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Shell-escaped rendering of the command line, for logs only.
    #[must_use]
    pub fn command_line(&self) -> String {
        let program = self.program.to_string_lossy();
        std::iter::once(shell_escape::escape(program))
            .chain(
                self.args
                    .iter()
                    .map(|arg| shell_escape::escape(arg.as_str().into())),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInvocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &redacted_vars(&self.env))
            .field("working_dir", &self.working_dir)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Session handling for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionArg {
    /// Start a new agent session with this id.
    Fresh(String),
    /// Resume an existing agent session.
    Resume(String),
}

/// Builder for agent invocations.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    binary: PathBuf,
    prompt: String,
    output_format: OutputFormat,
    session: Option<SessionArg>,
    conversation_id: Option<String>,
    allowed_tools: Vec<String>,
    disallowed_tools: Vec<String>,
    max_turns: Option<u32>,
    mcp_config: Option<PathBuf>,
    model: Option<String>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandBuilder {
    /// Create a new builder with the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            prompt: prompt.into(),
            output_format: OutputFormat::default(),
            session: None,
            conversation_id: None,
            allowed_tools: Vec::new(),
            disallowed_tools: Vec::new(),
            max_turns: None,
            mcp_config: None,
            model: None,
            working_dir: None,
            timeout: None,
        }
    }

    /// Create a builder carrying every relevant field of a configuration snapshot.
    #[must_use]
    pub fn from_config(config: &ClientConfig, prompt: impl Into<String>) -> Self {
        Self {
            binary: config.binary.clone(),
            output_format: config.output_format,
            allowed_tools: config.allowed_tools.clone(),
            disallowed_tools: config.disallowed_tools.clone(),
            max_turns: config.max_turns,
            mcp_config: config.mcp_config.clone(),
            model: config.auth.model.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout,
            ..Self::new(prompt)
        }
    }

    #[must_use]
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Start a new agent session with a caller-chosen id.
    #[must_use]
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session = Some(SessionArg::Fresh(id.into()));
        self
    }

    /// Resume an existing agent session.
    #[must_use]
    pub fn resume(mut self, token: impl Into<String>) -> Self {
        self.session = Some(SessionArg::Resume(token.into()));
        self
    }

    /// Expose the conversation id to the agent through the environment.
    #[must_use]
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn allowed_tools(mut self, tools: &[&str]) -> Self {
        self.allowed_tools = tools.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn disallowed_tools(mut self, tools: &[&str]) -> Self {
        self.disallowed_tools = tools.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    #[must_use]
    pub fn mcp_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.mcp_config = Some(path.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Check the inputs before anything is spawned.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a blank prompt, a tool that is both
    /// allowed and disallowed, or an unusable MCP configuration file.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::validation("Prompt cannot be empty"));
        }

        check_tool_overlap(&self.allowed_tools, &self.disallowed_tools)?;

        if let Some(path) = &self.mcp_config {
            McpConfig::load(path)?;
        }

        Ok(())
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string()];

        if self.output_format != OutputFormat::Text {
            args.push("--output-format".to_string());
            args.push(self.output_format.as_str().to_string());
        }
        if self.output_format == OutputFormat::StreamJson {
            // Print mode only emits stream-json when verbose.
            args.push("--verbose".to_string());
        }

        match &self.session {
            Some(SessionArg::Fresh(id)) => {
                args.push("--session-id".to_string());
                args.push(id.clone());
            }
            Some(SessionArg::Resume(token)) => {
                args.push("--resume".to_string());
                args.push(token.clone());
            }
            None => {}
        }

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        let tools = join_tools(&self.allowed_tools);
        if !tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(tools);
        }

        let tools = join_tools(&self.disallowed_tools);
        if !tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(tools);
        }

        if let Some(turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(turns.to_string());
        }

        if let Some(path) = &self.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(path.to_string_lossy().into_owned());
        }

        // The prompt goes last, after `--`, so a leading dash is never read as a flag.
        args.push("--".to_string());
        args.push(self.prompt.clone());
        args
    }

    /// Validate and build the invocation, layering `auth` onto the environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if [`validate`](Self::validate) fails.
    pub fn build(&self, auth: AuthContext) -> Result<ProcessInvocation> {
        self.build_with(|| Ok(auth))
    }

    /// Validate, then resolve the environment overlay and build the invocation.
    ///
    /// `resolve` only runs once the inputs are known to be valid, so input
    /// errors are reported ahead of missing credentials.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if [`validate`](Self::validate) fails, or
    /// whatever `resolve` returns.
    pub fn build_with<F>(&self, resolve: F) -> Result<ProcessInvocation>
    where
        F: FnOnce() -> Result<AuthContext>,
    {
        self.validate()?;

        let mut env = resolve()?.into_vars();
        if let Some(id) = &self.conversation_id {
            env.insert(CONVERSATION_ID_ENV.to_string(), id.clone());
        }

        Ok(ProcessInvocation {
            program: self.binary.clone(),
            args: self.build_args(),
            env,
            working_dir: self.working_dir.clone(),
            timeout: self.timeout,
        })
    }
}

/// Join tool names into the single comma-separated token the agent expects.
#[must_use]
pub fn join_tools(tools: &[String]) -> String {
    tool_names(tools).collect::<Vec<_>>().join(",")
}
