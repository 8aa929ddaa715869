//! Configuration file loader.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::AuthSettings;

use super::{ClientConfig, MalformedLinePolicy, OutputFormat, DEFAULT_BINARY};

/// Client configuration as written in a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Authentication settings (`auth`, `api_key`, `region`, ...).
    #[serde(flatten)]
    pub auth: AuthSettings,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub max_turns: Option<u32>,
    pub mcp_config: Option<PathBuf>,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: Option<u64>,
    pub output_format: OutputFormat,
    pub binary: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub malformed_lines: MalformedLinePolicy,
    /// Seconds to wait after SIGTERM before killing.
    pub terminate_grace_secs: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        let defaults = ClientConfig::default();
        Self {
            auth: defaults.auth,
            allowed_tools: defaults.allowed_tools,
            disallowed_tools: defaults.disallowed_tools,
            max_turns: defaults.max_turns,
            mcp_config: defaults.mcp_config,
            timeout_secs: None,
            output_format: defaults.output_format,
            binary: PathBuf::from(DEFAULT_BINARY),
            working_dir: defaults.working_dir,
            malformed_lines: defaults.malformed_lines,
            terminate_grace_secs: defaults.terminate_grace.as_secs(),
        }
    }
}

impl From<FileConfig> for ClientConfig {
    fn from(file: FileConfig) -> Self {
        Self {
            auth: file.auth,
            allowed_tools: file.allowed_tools,
            disallowed_tools: file.disallowed_tools,
            max_turns: file.max_turns,
            mcp_config: file.mcp_config,
            timeout: file.timeout_secs.map(Duration::from_secs),
            output_format: file.output_format,
            binary: file.binary,
            working_dir: file.working_dir,
            malformed_lines: file.malformed_lines,
            terminate_grace: Duration::from_secs(file.terminate_grace_secs),
        }
    }
}

/// Configuration loader that searches multiple locations.
#[derive(Debug)]
pub struct ConfigLoader {
    /// Search paths in order of priority.
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths.
    #[must_use]
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        // 1. Current directory: .claude-code-sdk.toml
        search_paths.push(PathBuf::from(".claude-code-sdk.toml"));

        // 2. User config directory: ~/.config/claude-code-sdk/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("claude-code-sdk").join("config.toml"));
        }

        Self { search_paths }
    }

    /// Create a config loader with a specific config file path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            search_paths: vec![path],
        }
    }

    /// Load configuration from the first available file, or return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        for path in &self.search_paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config file");
                return Self::load_from_path(path).map(ClientConfig::from);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(ClientConfig::default())
    }

    fn load_from_path(path: &PathBuf) -> Result<FileConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })
    }

    /// Get the search paths for debugging.
    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find the first config file that exists.
    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|p| p.exists()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}
